//! Fractal Core Library
//!
//! Election orchestration core for fractal, chain-driven elections: phase
//! tracking, contract-exact group sizing and room allocation, round
//! materialization, reminder scheduling and SQLite storage.

pub mod chain;
pub mod config;
pub mod error;
pub mod groups;
pub mod invariants;
pub mod messaging;
pub mod models;
pub mod orchestrator;
pub mod phase;
pub mod reminders;
pub mod storage;
pub mod tick;

#[cfg(test)]
mod testkit;

pub use chain::{
    parse_chain_time, ActionRecord, ChainPhase, ChainSource, ParticipantRecord, RawPhase,
    RoundConfig, TimeRange,
};
pub use config::{Config, ConfigError, DeliveryMode};
pub use error::{Error, Result};
pub use groups::{compute_round_sizes, room_of, RoomLayout, RoundShape};
pub use messaging::{Button, ChatMember, Messenger};
pub use models::*;
pub use orchestrator::{CleanupReport, RoundOrchestrator, RoundReport};
pub use phase::{ElectionPhaseTracker, Observation};
pub use reminders::{
    PlainText, ReminderContext, ReminderKind, ReminderReport, ReminderScheduler, ReminderText,
    Rendered,
};
pub use storage::{
    ContactRepository, Database, ElectionRepository, ReminderRepository, RoomRepository, Storage,
};
pub use tick::{Coordinator, TickReport};
