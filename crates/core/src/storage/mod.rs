//! SQLite storage layer for the election coordinator

mod contacts;
mod elections;
mod migrations;
mod parse;
mod reminders;
mod rooms;
mod traits;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ChatHandle, Contact, DeliveryOutcome, Election, LiveRound, PhaseKind, ReminderDefinition,
    ReminderDelivery, ReminderGroup, Room, RoomMember,
};

pub use contacts::ContactStore;
pub use elections::ElectionStore;
pub use reminders::ReminderStore;
pub use rooms::RoomStore;
pub use traits::{
    ContactRepository, ElectionRepository, ReminderRepository, RoomRepository, Storage,
};

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Raw connection, for tests that tamper with the schema
    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    pub fn elections(&self) -> ElectionStore<'_> {
        ElectionStore::new(&self.conn)
    }

    pub fn rooms(&self) -> RoomStore<'_> {
        RoomStore::new(&self.conn)
    }

    pub fn reminders(&self) -> ReminderStore<'_> {
        ReminderStore::new(&self.conn)
    }

    pub fn contacts(&self) -> ContactStore<'_> {
        ContactStore::new(&self.conn)
    }
}

// Repository traits for Database, delegating to the stores

impl ElectionRepository for Database {
    fn create_election(&self, election: &Election) -> Result<i64> {
        self.elections().create(election)
    }

    fn find_election_by_id(&self, id: i64) -> Result<Option<Election>> {
        self.elections().find_by_id(id)
    }

    fn find_election_by_start(
        &self,
        contract: &str,
        start_at: DateTime<Utc>,
    ) -> Result<Option<Election>> {
        self.elections().find_by_start(contract, start_at)
    }

    fn latest_election(&self, contract: &str) -> Result<Option<Election>> {
        self.elections().latest(contract)
    }

    fn find_dummy_election(&self, contract: &str) -> Result<Option<Election>> {
        self.elections().find_dummy(contract)
    }

    fn update_election_phase(&self, id: i64, phase: PhaseKind) -> Result<()> {
        self.elections().update_phase(id, phase)
    }

    fn update_live_round(
        &self,
        id: i64,
        live_round: Option<LiveRound>,
        round_end_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.elections().update_live_round(id, live_round, round_end_at)
    }

    fn advance_round(
        &self,
        id: i64,
        live_round: LiveRound,
        round_end_at: Option<DateTime<Utc>>,
        cleanup_round: Option<u8>,
        cleanup_round_end: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.elections()
            .advance_round(id, live_round, round_end_at, cleanup_round, cleanup_round_end)
    }

    fn finish_round_cleanup(&self, id: i64, round: u8) -> Result<bool> {
        self.elections().finish_cleanup(id, round)
    }
}

impl RoomRepository for Database {
    fn create_room(&self, room: &Room) -> Result<()> {
        self.rooms().create(room)
    }

    fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        self.rooms().find_by_id(id)
    }

    fn list_rooms_for_round(&self, election_id: i64, round: u8) -> Result<Vec<Room>> {
        self.rooms().list_for_round(election_id, round)
    }

    fn count_rooms_for_round(&self, election_id: i64, round: u8) -> Result<u32> {
        self.rooms().count_for_round(election_id, round)
    }

    fn list_unclaimed_rooms(&self, anchor_election_id: i64) -> Result<Vec<Room>> {
        self.rooms().list_unclaimed(anchor_election_id)
    }

    fn materialize_room(&self, room: &Room, members: &[RoomMember]) -> Result<usize> {
        self.rooms().materialize(room, members)
    }

    fn set_chat_handle(&self, room_id: Uuid, chat: &ChatHandle) -> Result<()> {
        self.rooms().set_chat_handle(room_id, chat)
    }

    fn mark_room_invited(&self, room_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.rooms().mark_invited(room_id, at)
    }

    fn archive_room(&self, room_id: Uuid) -> Result<()> {
        self.rooms().archive(room_id)
    }

    fn list_room_members(&self, room_id: Uuid) -> Result<Vec<RoomMember>> {
        self.rooms().list_members(room_id)
    }

    fn count_room_members(&self, room_id: Uuid) -> Result<u32> {
        self.rooms().count_members(room_id)
    }

    fn list_round_members(&self, election_id: i64, round: u8) -> Result<Vec<RoomMember>> {
        self.rooms().list_members_for_round(election_id, round)
    }
}

impl ReminderRepository for Database {
    fn ensure_reminder(&self, def: &ReminderDefinition) -> Result<bool> {
        self.reminders().ensure(def)
    }

    fn list_reminders(
        &self,
        election_id: i64,
        group: Option<ReminderGroup>,
    ) -> Result<Vec<ReminderDefinition>> {
        self.reminders().list_for_election(election_id, group)
    }

    fn delivered_accounts(&self, reminder_id: Uuid) -> Result<HashSet<String>> {
        self.reminders().delivered_accounts(reminder_id)
    }

    fn find_delivery(&self, reminder_id: Uuid, account: &str) -> Result<Option<ReminderDelivery>> {
        self.reminders().find_delivery(reminder_id, account)
    }

    fn reserve_delivery(
        &self,
        reminder_id: Uuid,
        account: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.reminders().reserve(reminder_id, account, at)
    }

    fn record_delivery(&self, delivery: &ReminderDelivery) -> Result<()> {
        self.reminders().record(delivery)
    }

    fn count_deliveries(&self, reminder_id: Uuid, outcome: DeliveryOutcome) -> Result<u32> {
        self.reminders().count_deliveries(reminder_id, outcome)
    }
}

impl ContactRepository for Database {
    fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.contacts().upsert(contact)
    }

    fn find_contact(&self, account: &str) -> Result<Option<Contact>> {
        self.contacts().find(account)
    }

    fn find_contacts(&self, accounts: &[String]) -> Result<HashMap<String, String>> {
        self.contacts().find_many(accounts)
    }
}
