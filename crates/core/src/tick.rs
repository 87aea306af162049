//! One poll tick: phase detection, round orchestration, reminder firing

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::chain::{ChainPhase, ChainSource, RoundConfig};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::messaging::Messenger;
use crate::models::{Election, LiveRound, PhaseKind};
use crate::orchestrator::RoundOrchestrator;
use crate::phase::{ElectionPhaseTracker, Observation};
use crate::reminders::{ReminderScheduler, ReminderText};
use crate::storage::Storage;

/// Summary of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub phase: PhaseKind,
    pub election_id: Option<i64>,
    pub round_changed: bool,
    pub previous_round: Option<LiveRound>,
    pub rooms_materialized: u32,
    pub rooms_precreated: u32,
    pub reminders_sent: u32,
    pub reminders_failed: u32,
    /// Why the round could not be materialized this tick
    pub materialize_error: Option<String>,
    /// The materialize error cancels the round rather than waiting on a retry
    pub materialize_fatal: bool,
    /// The phase could not be read; only stored reminders were fired
    pub chain_unavailable: bool,
}

impl TickReport {
    fn new(observation: &Observation) -> Self {
        Self {
            phase: observation.phase,
            election_id: observation.election.as_ref().map(|e| e.id),
            round_changed: observation.round_changed,
            previous_round: observation.previous_round.filter(|_| observation.round_changed),
            rooms_materialized: 0,
            rooms_precreated: 0,
            reminders_sent: 0,
            reminders_failed: 0,
            materialize_error: None,
            materialize_fatal: false,
            chain_unavailable: false,
        }
    }
}

/// Runs ticks against injected collaborators
pub struct Coordinator<'a, S, C, M, T>
where
    S: Storage,
    C: ChainSource + ?Sized,
    M: Messenger + ?Sized,
    T: ReminderText + ?Sized,
{
    store: &'a S,
    chain: &'a C,
    messenger: &'a M,
    text: &'a T,
    config: &'a Config,
}

impl<'a, S, C, M, T> Coordinator<'a, S, C, M, T>
where
    S: Storage,
    C: ChainSource + ?Sized,
    M: Messenger + ?Sized,
    T: ReminderText + ?Sized,
{
    pub fn new(store: &'a S, chain: &'a C, messenger: &'a M, text: &'a T, config: &'a Config) -> Self {
        Self {
            store,
            chain,
            messenger,
            text,
            config,
        }
    }

    /// Run one full pass for `contract` at time `now`
    #[instrument(skip(self))]
    pub fn run_one_tick(&self, contract: &str, now: DateTime<Utc>) -> Result<TickReport> {
        let raw = match self.chain.current_phase(None) {
            Ok(raw) => raw,
            Err(e @ Error::Chain(_)) => {
                warn!(error = %e, "Chain phase unavailable, firing stored reminders only");
                return self.fire_stored_reminders(contract, now);
            }
            Err(e) => return Err(e),
        };
        let phase = raw.parse()?;
        let observation = ElectionPhaseTracker::new(self.store, contract).observe(&phase)?;
        let mut report = TickReport::new(&observation);

        let Some(election) = observation.election.as_ref() else {
            return Ok(report);
        };

        let orchestrator =
            RoundOrchestrator::new(self.store, self.chain, self.messenger, &self.config.election);
        let scheduler = ReminderScheduler::new(
            self.store,
            self.chain,
            self.messenger,
            self.text,
            &self.config.reminders,
        );

        if let Some(closed) = election.cleanup_round {
            match orchestrator.post_round_cleanup(election, closed, election.cleanup_round_end) {
                Ok(_) => {
                    self.store.finish_round_cleanup(election.id, closed)?;
                }
                Err(e) => warn!(round = closed, error = %e, "Post-round cleanup failed, retrying next tick"),
            }
        }

        match &phase {
            ChainPhase::Pending => {}
            ChainPhase::Registration { .. } => {
                scheduler.ensure_election_start(election)?;
            }
            ChainPhase::Seeding { .. } | ChainPhase::InitVoters => {
                scheduler.ensure_election_start(election)?;
                if self.config.election.precreate_rooms {
                    match orchestrator.precreate_rooms(election) {
                        Ok(created) => report.rooms_precreated = created,
                        Err(e) => warn!(error = %e, "Room pre-creation failed"),
                    }
                }
            }
            ChainPhase::Active { round, config, .. } => {
                match config {
                    Some(table) => match self.materialize(&orchestrator, election, *round, table) {
                        Ok(rooms) => report.rooms_materialized = rooms,
                        Err(e) => {
                            if e.is_round_fatal() {
                                error!(round, error = %e, "Round materialization aborted");
                            } else {
                                warn!(round, error = %e, "Round materialization deferred");
                            }
                            report.materialize_fatal = e.is_round_fatal();
                            report.materialize_error = Some(e.to_string());
                        }
                    },
                    None => debug!(round, "Round is being tallied"),
                }
                if let Some(end) = election.round_end_at {
                    scheduler.ensure_round_end(election, *round, end)?;
                }
            }
            ChainPhase::Final => {}
        }

        let reminders = scheduler.fire_due_reminders(election, now, None)?;
        report.reminders_sent = reminders.sent;
        report.reminders_failed = reminders.failed;

        if report.round_changed || report.rooms_materialized > 0 || report.reminders_sent > 0 {
            info!(
                phase = %report.phase,
                election_id = ?report.election_id,
                rooms = report.rooms_materialized,
                reminders = report.reminders_sent,
                "Tick done"
            );
        }
        Ok(report)
    }

    /// Fire reminders already stored for the latest election while the
    /// chain cannot report its phase
    fn fire_stored_reminders(&self, contract: &str, now: DateTime<Utc>) -> Result<TickReport> {
        let election = self.store.latest_election(contract)?;
        let mut report = TickReport {
            phase: election.as_ref().map_or(PhaseKind::Pending, |e| e.phase),
            election_id: election.as_ref().map(|e| e.id),
            round_changed: false,
            previous_round: None,
            rooms_materialized: 0,
            rooms_precreated: 0,
            reminders_sent: 0,
            reminders_failed: 0,
            materialize_error: None,
            materialize_fatal: false,
            chain_unavailable: true,
        };

        if let Some(election) = election {
            let scheduler = ReminderScheduler::new(
                self.store,
                self.chain,
                self.messenger,
                self.text,
                &self.config.reminders,
            );
            let reminders = scheduler.fire_due_reminders(&election, now, None)?;
            report.reminders_sent = reminders.sent;
            report.reminders_failed = reminders.failed;
        }
        Ok(report)
    }

    /// Materialize the live round from the contract's round table
    fn materialize(
        &self,
        orchestrator: &RoundOrchestrator<'_, S, C, M>,
        election: &Election,
        round: u8,
        table: &[RoundConfig],
    ) -> Result<u32> {
        let entry = table.get(round as usize).ok_or_else(|| {
            Error::MalformedPayload(format!(
                "round {} missing from a {} round table",
                round + 1,
                table.len()
            ))
        })?;
        let is_last_round = round as usize + 1 == table.len();

        let report = orchestrator.ensure_round_materialized(
            election,
            round,
            entry.num_participants,
            entry.num_groups,
            is_last_round,
            None,
        )?;
        Ok(report.rooms_created + report.rooms_claimed)
    }
}
