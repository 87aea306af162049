//! Storage repository traits
//!
//! These traits define the storage interface used by the phase tracker,
//! the round orchestrator and the reminder scheduler. `Database` is the
//! SQLite implementation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ChatHandle, Contact, DeliveryOutcome, Election, LiveRound, PhaseKind, ReminderDefinition,
    ReminderDelivery, ReminderGroup, Room, RoomMember,
};

/// Election repository operations
pub trait ElectionRepository {
    /// Insert an election, returning its id
    fn create_election(&self, election: &Election) -> Result<i64>;

    fn find_election_by_id(&self, id: i64) -> Result<Option<Election>>;

    /// Find the real election of a contract by start time
    fn find_election_by_start(
        &self,
        contract: &str,
        start_at: DateTime<Utc>,
    ) -> Result<Option<Election>>;

    /// Most recent real election of a contract
    fn latest_election(&self, contract: &str) -> Result<Option<Election>>;

    /// Dummy anchor election of a contract
    fn find_dummy_election(&self, contract: &str) -> Result<Option<Election>>;

    fn update_election_phase(&self, id: i64, phase: PhaseKind) -> Result<()>;

    /// Persist the live round and its end time
    fn update_live_round(
        &self,
        id: i64,
        live_round: Option<LiveRound>,
        round_end_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Enter `live_round`, recording the round that still needs cleanup
    fn advance_round(
        &self,
        id: i64,
        live_round: LiveRound,
        round_end_at: Option<DateTime<Utc>>,
        cleanup_round: Option<u8>,
        cleanup_round_end: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Clear the cleanup marker for `round`; false if it no longer names it
    fn finish_round_cleanup(&self, id: i64, round: u8) -> Result<bool>;
}

/// Room and membership repository operations
pub trait RoomRepository {
    fn create_room(&self, room: &Room) -> Result<()>;

    fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>>;

    /// Non-archived rooms of a round ordered by room index
    fn list_rooms_for_round(&self, election_id: i64, round: u8) -> Result<Vec<Room>>;

    /// Count of non-archived rooms of a round
    fn count_rooms_for_round(&self, election_id: i64, round: u8) -> Result<u32>;

    /// Pre-created rooms still waiting for a round
    fn list_unclaimed_rooms(&self, anchor_election_id: i64) -> Result<Vec<Room>>;

    /// Write a room and its members atomically, returning the members inserted
    fn materialize_room(&self, room: &Room, members: &[RoomMember]) -> Result<usize>;

    fn set_chat_handle(&self, room_id: Uuid, chat: &ChatHandle) -> Result<()>;

    fn mark_room_invited(&self, room_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Archive a room (never deleted)
    fn archive_room(&self, room_id: Uuid) -> Result<()>;

    fn list_room_members(&self, room_id: Uuid) -> Result<Vec<RoomMember>>;

    fn count_room_members(&self, room_id: Uuid) -> Result<u32>;

    /// Every member seated in a round
    fn list_round_members(&self, election_id: i64, round: u8) -> Result<Vec<RoomMember>>;
}

/// Reminder definition and delivery repository operations
pub trait ReminderRepository {
    /// Store a definition unless the same rule exists; true if inserted
    fn ensure_reminder(&self, def: &ReminderDefinition) -> Result<bool>;

    /// Definitions of an election, optionally limited to one group
    fn list_reminders(
        &self,
        election_id: i64,
        group: Option<ReminderGroup>,
    ) -> Result<Vec<ReminderDefinition>>;

    /// Accounts with a delivery row of any outcome
    fn delivered_accounts(&self, reminder_id: Uuid) -> Result<HashSet<String>>;

    fn find_delivery(&self, reminder_id: Uuid, account: &str) -> Result<Option<ReminderDelivery>>;

    /// Write a pending row before sending; false if a row already exists
    fn reserve_delivery(&self, reminder_id: Uuid, account: &str, at: DateTime<Utc>)
        -> Result<bool>;

    /// Record an attempt outcome, replacing a pending row
    fn record_delivery(&self, delivery: &ReminderDelivery) -> Result<()>;

    fn count_deliveries(&self, reminder_id: Uuid, outcome: DeliveryOutcome) -> Result<u32>;
}

/// Contact directory operations
pub trait ContactRepository {
    fn upsert_contact(&self, contact: &Contact) -> Result<()>;

    fn find_contact(&self, account: &str) -> Result<Option<Contact>>;

    /// Handles of the given accounts; unknown accounts are absent
    fn find_contacts(&self, accounts: &[String]) -> Result<HashMap<String, String>>;
}

/// Combined storage interface
///
/// Provides access to all repository operations.
pub trait Storage: ElectionRepository + RoomRepository + ReminderRepository + ContactRepository {}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where
    T: ElectionRepository + RoomRepository + ReminderRepository + ContactRepository
{
}
