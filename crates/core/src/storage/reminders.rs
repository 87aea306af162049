//! Reminder definition and delivery storage operations

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_group, parse_outcome, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{DeliveryOutcome, ReminderDefinition, ReminderDelivery, ReminderGroup};

fn definition_from_row(row: &Row<'_>) -> rusqlite::Result<ReminderDefinition> {
    Ok(ReminderDefinition {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        election_id: row.get(1)?,
        group: parse_group(&row.get::<_, String>(2)?)?,
        offset_minutes: row.get(3)?,
        round: row.get(4)?,
        fire_at: parse_datetime(&row.get::<_, String>(5)?)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?)?,
    })
}

pub struct ReminderStore<'a> {
    conn: &'a Connection,
}

impl<'a> ReminderStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Store a definition unless an identical rule exists.
    /// Returns true if the definition was inserted.
    #[instrument(skip(self, def), fields(group = %def.group, offset = def.offset_minutes, round = ?def.round))]
    pub fn ensure(&self, def: &ReminderDefinition) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO reminders (id, election_id, reminder_group, offset_minutes, round, fire_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                def.id.to_string(),
                def.election_id,
                def.group.as_str(),
                def.offset_minutes,
                def.round,
                def.fire_at.to_rfc3339(),
                def.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Definitions of an election, optionally limited to one group
    #[instrument(skip(self))]
    pub fn list_for_election(
        &self,
        election_id: i64,
        group: Option<ReminderGroup>,
    ) -> Result<Vec<ReminderDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, election_id, reminder_group, offset_minutes, round, fire_at, created_at
             FROM reminders
             WHERE election_id = ?1 AND (?2 IS NULL OR reminder_group = ?2)
             ORDER BY fire_at, offset_minutes DESC",
        )?;
        let defs = stmt
            .query_map(
                params![election_id, group.map(|g| g.as_str())],
                definition_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(defs)
    }

    /// Accounts that already have a delivery row of any outcome
    #[instrument(skip(self))]
    pub fn delivered_accounts(&self, reminder_id: Uuid) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT account FROM reminder_deliveries WHERE reminder_id = ?1")?;
        let accounts = stmt
            .query_map(params![reminder_id.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(accounts)
    }

    #[instrument(skip(self))]
    pub fn find_delivery(&self, reminder_id: Uuid, account: &str) -> Result<Option<ReminderDelivery>> {
        let delivery = self
            .conn
            .query_row(
                "SELECT reminder_id, account, outcome, attempted_at
                 FROM reminder_deliveries WHERE reminder_id = ?1 AND account = ?2",
                params![reminder_id.to_string(), account],
                |row| {
                    Ok(ReminderDelivery {
                        reminder_id: parse_uuid(&row.get::<_, String>(0)?)?,
                        account: row.get(1)?,
                        outcome: parse_outcome(&row.get::<_, String>(2)?)?,
                        attempted_at: parse_datetime(&row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(delivery)
    }

    /// Claim a recipient before sending by writing a pending row.
    /// Returns false if a row already exists.
    #[instrument(skip(self))]
    pub fn reserve(&self, reminder_id: Uuid, account: &str, at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO reminder_deliveries (reminder_id, account, outcome, attempted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                reminder_id.to_string(),
                account,
                DeliveryOutcome::Pending.as_str(),
                at.to_rfc3339()
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Record the outcome of an attempt, replacing a pending reservation
    #[instrument(skip(self, delivery), fields(account = %delivery.account, outcome = delivery.outcome.as_str()))]
    pub fn record(&self, delivery: &ReminderDelivery) -> Result<()> {
        self.conn.execute(
            "INSERT INTO reminder_deliveries (reminder_id, account, outcome, attempted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(reminder_id, account) DO UPDATE SET
                outcome = excluded.outcome,
                attempted_at = excluded.attempted_at",
            params![
                delivery.reminder_id.to_string(),
                delivery.account,
                delivery.outcome.as_str(),
                delivery.attempted_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn count_deliveries(&self, reminder_id: Uuid, outcome: DeliveryOutcome) -> Result<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM reminder_deliveries WHERE reminder_id = ?1 AND outcome = ?2",
            params![reminder_id.to_string(), outcome.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Election, PhaseKind};
    use crate::storage::Database;
    use chrono::TimeZone;

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 10, 5, 13, 0, 0).unwrap();
        let id = db
            .elections()
            .create(&Election::new("genesis.eden", start, PhaseKind::Registration))
            .unwrap();
        (db, id)
    }

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 5, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let (db, election_id) = setup();
        let def = ReminderDefinition::new(election_id, ReminderGroup::ElectionStart, 60, None, anchor());
        let again = ReminderDefinition::new(election_id, ReminderGroup::ElectionStart, 60, None, anchor());

        assert!(db.reminders().ensure(&def).unwrap());
        assert!(!db.reminders().ensure(&again).unwrap());

        let defs = db.reminders().list_for_election(election_id, None).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id, def.id);
    }

    #[test]
    fn test_list_filters_by_group() {
        let (db, election_id) = setup();
        db.reminders()
            .ensure(&ReminderDefinition::new(election_id, ReminderGroup::ElectionStart, 1440, None, anchor()))
            .unwrap();
        db.reminders()
            .ensure(&ReminderDefinition::new(election_id, ReminderGroup::RoundEnd, 10, Some(0), anchor()))
            .unwrap();
        db.reminders()
            .ensure(&ReminderDefinition::new(election_id, ReminderGroup::RoundEnd, 10, Some(1), anchor()))
            .unwrap();

        let round_end = db
            .reminders()
            .list_for_election(election_id, Some(ReminderGroup::RoundEnd))
            .unwrap();
        assert_eq!(round_end.len(), 2);
        assert_eq!(db.reminders().list_for_election(election_id, None).unwrap().len(), 3);
    }

    #[test]
    fn test_reserve_then_record() {
        let (db, election_id) = setup();
        let def = ReminderDefinition::new(election_id, ReminderGroup::ElectionStart, 10, None, anchor());
        db.reminders().ensure(&def).unwrap();

        assert!(db.reminders().reserve(def.id, "alice", Utc::now()).unwrap());
        assert!(!db.reminders().reserve(def.id, "alice", Utc::now()).unwrap());
        assert_eq!(
            db.reminders().find_delivery(def.id, "alice").unwrap().unwrap().outcome,
            DeliveryOutcome::Pending
        );

        db.reminders()
            .record(&ReminderDelivery {
                reminder_id: def.id,
                account: "alice".into(),
                outcome: DeliveryOutcome::Sent,
                attempted_at: Utc::now(),
            })
            .unwrap();

        assert_eq!(db.reminders().count_deliveries(def.id, DeliveryOutcome::Sent).unwrap(), 1);
        assert_eq!(db.reminders().count_deliveries(def.id, DeliveryOutcome::Pending).unwrap(), 0);
        assert!(db.reminders().delivered_accounts(def.id).unwrap().contains("alice"));
        assert!(db.reminders().find_delivery(def.id, "bob").unwrap().is_none());
    }
}
