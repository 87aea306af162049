//! Fractal - election orchestration coordinator
//!
//! Polls the election contract, keeps round rooms in step with it and
//! sends reminders. Chain state comes from a JSON snapshot and messaging
//! is logged instead of sent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use fractal_core::{compute_round_sizes, Contact, ContactRepository, Coordinator, PlainText};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod dry_run;
mod snapshot;
mod state;

use dry_run::DryRunMessenger;
use snapshot::SnapshotChain;
use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "fractal")]
#[command(about = "Fractal election coordinator", long_about = None)]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll the chain snapshot and drive the election
    Run {
        /// JSON chain snapshot, re-read every tick
        #[arg(long)]
        snapshot: PathBuf,
        /// Link attached to round reminders
        #[arg(long)]
        vote_url: Option<String>,
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },
    /// Print the round table for a participant count
    Sizes { participants: u32 },
    /// Register the chat handle of a chain account
    Contact { account: String, handle: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            snapshot,
            vote_url,
            once,
        } => {
            let state = AppState::new(cli.config.as_deref())?;
            run(&state, snapshot, vote_url, once).await
        }
        Commands::Sizes { participants } => print_sizes(participants),
        Commands::Contact { account, handle } => {
            let state = AppState::new(cli.config.as_deref())?;
            state
                .db
                .upsert_contact(&Contact::new(account.clone(), handle.clone()))
                .context("Failed to save contact")?;
            println!("{} -> {}", account, handle);
            Ok(())
        }
    }
}

async fn run(state: &AppState, snapshot: PathBuf, vote_url: Option<String>, once: bool) -> Result<()> {
    let chain = SnapshotChain::new(snapshot);
    let messenger = DryRunMessenger::new();
    let text = PlainText { vote_url };
    let coordinator = Coordinator::new(&state.db, &chain, &messenger, &text, &state.config);
    let contract = state.config.election.contract.as_str();

    tracing::info!(%contract, "Starting Fractal coordinator");

    if once {
        let report = coordinator.run_one_tick(contract, Utc::now())?;
        tracing::info!(?report, "Tick complete");
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.poll.interval_seconds));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match coordinator.run_one_tick(contract, Utc::now()) {
                    Ok(report) => tracing::debug!(?report, "Tick complete"),
                    Err(e) => tracing::error!("Tick failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}

fn print_sizes(participants: u32) -> Result<()> {
    let rounds = compute_round_sizes(participants)
        .with_context(|| format!("Cannot size an election of {}", participants))?;
    if rounds.is_empty() {
        println!("No rounds for {} participants", participants);
        return Ok(());
    }

    println!("round  participants  groups  size  largest");
    for shape in &rounds {
        println!(
            "{:>5}  {:>12}  {:>6}  {:>4}  {:>7}{}",
            shape.round + 1,
            shape.participants,
            shape.group_count,
            shape.group_size,
            shape.max_group_size(),
            if shape.is_final_round { "  (chief delegates)" } else { "" }
        );
    }
    Ok(())
}
