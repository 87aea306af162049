//! Election storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;

use super::parse::{parse_datetime, parse_datetime_opt, parse_live_round_opt, parse_phase, OptionalExt};
use crate::error::Result;
use crate::models::{Election, LiveRound, PhaseKind};

const ELECTION_COLUMNS: &str = "id, contract, start_at, phase, live_round, round_end_at, \
     is_dummy, created_at, cleanup_round, cleanup_round_end";

fn election_from_row(row: &Row<'_>) -> rusqlite::Result<Election> {
    Ok(Election {
        id: row.get(0)?,
        contract: row.get(1)?,
        start_at: parse_datetime(&row.get::<_, String>(2)?)?,
        phase: parse_phase(&row.get::<_, String>(3)?)?,
        live_round: parse_live_round_opt(row.get::<_, Option<i64>>(4)?)?,
        round_end_at: parse_datetime_opt(row.get::<_, Option<String>>(5)?)?,
        is_dummy: row.get::<_, i32>(6)? != 0,
        created_at: parse_datetime(&row.get::<_, String>(7)?)?,
        cleanup_round: row.get(8)?,
        cleanup_round_end: parse_datetime_opt(row.get::<_, Option<String>>(9)?)?,
    })
}

pub struct ElectionStore<'a> {
    conn: &'a Connection,
}

impl<'a> ElectionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert an election and return its row id
    #[instrument(skip(self, election), fields(contract = %election.contract, dummy = election.is_dummy))]
    pub fn create(&self, election: &Election) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO elections (contract, start_at, phase, live_round, round_end_at, is_dummy, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                election.contract,
                election.start_at.to_rfc3339(),
                election.phase.as_str(),
                election.live_round.map(LiveRound::to_db),
                election.round_end_at.map(|t| t.to_rfc3339()),
                election.is_dummy as i32,
                election.created_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: i64) -> Result<Option<Election>> {
        let sql = format!("SELECT {} FROM elections WHERE id = ?1", ELECTION_COLUMNS);
        let election = self
            .conn
            .query_row(&sql, params![id], election_from_row)
            .optional()?;
        Ok(election)
    }

    /// Find the real election of a contract starting at `start_at`
    #[instrument(skip(self))]
    pub fn find_by_start(&self, contract: &str, start_at: DateTime<Utc>) -> Result<Option<Election>> {
        let sql = format!(
            "SELECT {} FROM elections WHERE contract = ?1 AND start_at = ?2 AND is_dummy = 0",
            ELECTION_COLUMNS
        );
        let election = self
            .conn
            .query_row(&sql, params![contract, start_at.to_rfc3339()], election_from_row)
            .optional()?;
        Ok(election)
    }

    /// Most recent real election of a contract
    #[instrument(skip(self))]
    pub fn latest(&self, contract: &str) -> Result<Option<Election>> {
        let sql = format!(
            "SELECT {} FROM elections WHERE contract = ?1 AND is_dummy = 0
             ORDER BY start_at DESC, id DESC LIMIT 1",
            ELECTION_COLUMNS
        );
        let election = self
            .conn
            .query_row(&sql, params![contract], election_from_row)
            .optional()?;
        Ok(election)
    }

    /// The dummy anchor election of a contract
    #[instrument(skip(self))]
    pub fn find_dummy(&self, contract: &str) -> Result<Option<Election>> {
        let sql = format!(
            "SELECT {} FROM elections WHERE contract = ?1 AND is_dummy = 1",
            ELECTION_COLUMNS
        );
        let election = self
            .conn
            .query_row(&sql, params![contract], election_from_row)
            .optional()?;
        Ok(election)
    }

    #[instrument(skip(self))]
    pub fn update_phase(&self, id: i64, phase: PhaseKind) -> Result<()> {
        self.conn.execute(
            "UPDATE elections SET phase = ?1 WHERE id = ?2",
            params![phase.as_str(), id],
        )?;
        Ok(())
    }

    /// Persist the live round and the end time of that round
    #[instrument(skip(self))]
    pub fn update_live_round(
        &self,
        id: i64,
        live_round: Option<LiveRound>,
        round_end_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE elections SET live_round = ?1, round_end_at = ?2 WHERE id = ?3",
            params![
                live_round.map(LiveRound::to_db),
                round_end_at.map(|t| t.to_rfc3339()),
                id
            ],
        )?;
        Ok(())
    }

    /// Move to a new live round and record the round awaiting cleanup, in
    /// one statement
    #[instrument(skip(self))]
    pub fn advance_round(
        &self,
        id: i64,
        live_round: LiveRound,
        round_end_at: Option<DateTime<Utc>>,
        cleanup_round: Option<u8>,
        cleanup_round_end: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE elections
             SET live_round = ?1, round_end_at = ?2, cleanup_round = ?3, cleanup_round_end = ?4
             WHERE id = ?5",
            params![
                live_round.to_db(),
                round_end_at.map(|t| t.to_rfc3339()),
                cleanup_round,
                cleanup_round_end.map(|t| t.to_rfc3339()),
                id
            ],
        )?;
        Ok(())
    }

    /// Clear the cleanup marker if it still names `round`
    #[instrument(skip(self))]
    pub fn finish_cleanup(&self, id: i64, round: u8) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE elections SET cleanup_round = NULL, cleanup_round_end = NULL
             WHERE id = ?1 AND cleanup_round = ?2",
            params![id, round],
        )?;
        Ok(changed > 0)
    }
}
