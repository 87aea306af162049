//! Room and room membership storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    parse_chat_opt, parse_datetime, parse_datetime_opt, parse_origin, parse_uuid, OptionalExt,
};
use crate::error::Result;
use crate::models::{ChatHandle, Room, RoomMember};

const ROOM_COLUMNS: &str = "id, election_id, round, room_index, short_name, long_name, chat_handle, archived, created_by, created_at, invited_at";

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        election_id: row.get(1)?,
        round: row.get(2)?,
        room_index: row.get(3)?,
        short_name: row.get(4)?,
        long_name: row.get(5)?,
        chat_handle: parse_chat_opt(row.get::<_, Option<String>>(6)?),
        archived: row.get::<_, i32>(7)? != 0,
        created_by: parse_origin(&row.get::<_, String>(8)?)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?)?,
        invited_at: parse_datetime_opt(row.get::<_, Option<String>>(10)?)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<RoomMember> {
    Ok(RoomMember {
        room_id: parse_uuid(&row.get::<_, String>(0)?)?,
        election_id: row.get(1)?,
        round: row.get(2)?,
        account: row.get(3)?,
        contact_handle: row.get(4)?,
        added_at: parse_datetime(&row.get::<_, String>(5)?)?,
    })
}

pub struct RoomStore<'a> {
    conn: &'a Connection,
}

impl<'a> RoomStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a room
    #[instrument(skip(self, room), fields(room_id = %room.id, round = ?room.round, room_index = ?room.room_index))]
    pub fn create(&self, room: &Room) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rooms (id, election_id, round, room_index, short_name, long_name, chat_handle, archived, created_by, created_at, invited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                room.id.to_string(),
                room.election_id,
                room.round,
                room.room_index,
                room.short_name,
                room.long_name,
                room.chat_handle.as_ref().map(|c| c.0.clone()),
                room.archived as i32,
                room.created_by.as_str(),
                room.created_at.to_rfc3339(),
                room.invited_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        let sql = format!("SELECT {} FROM rooms WHERE id = ?1", ROOM_COLUMNS);
        let room = self
            .conn
            .query_row(&sql, params![id.to_string()], room_from_row)
            .optional()?;
        Ok(room)
    }

    /// Non-archived rooms of a round, by room index
    #[instrument(skip(self))]
    pub fn list_for_round(&self, election_id: i64, round: u8) -> Result<Vec<Room>> {
        let sql = format!(
            "SELECT {} FROM rooms WHERE election_id = ?1 AND round = ?2 AND archived = 0
             ORDER BY room_index",
            ROOM_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rooms = stmt
            .query_map(params![election_id, round], room_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    /// Count non-archived rooms of a round
    #[instrument(skip(self))]
    pub fn count_for_round(&self, election_id: i64, round: u8) -> Result<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE election_id = ?1 AND round = ?2 AND archived = 0",
            params![election_id, round],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Pre-created rooms not yet claimed by a round, oldest first
    #[instrument(skip(self))]
    pub fn list_unclaimed(&self, anchor_election_id: i64) -> Result<Vec<Room>> {
        let sql = format!(
            "SELECT {} FROM rooms WHERE election_id = ?1 AND round IS NULL AND archived = 0
             ORDER BY created_at, id",
            ROOM_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rooms = stmt
            .query_map(params![anchor_election_id], room_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    /// Write a room and its members in one transaction.
    ///
    /// Inserts the room or, for a claimed pre-created room, moves it to
    /// its round. Members already recorded are left untouched. Returns the
    /// number of members inserted.
    #[instrument(skip(self, room, members), fields(room_id = %room.id, members = members.len()))]
    pub fn materialize(&self, room: &Room, members: &[RoomMember]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO rooms (id, election_id, round, room_index, short_name, long_name, chat_handle, archived, created_by, created_at, invited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                election_id = excluded.election_id,
                round = excluded.round,
                room_index = excluded.room_index,
                short_name = excluded.short_name,
                long_name = excluded.long_name",
            params![
                room.id.to_string(),
                room.election_id,
                room.round,
                room.room_index,
                room.short_name,
                room.long_name,
                room.chat_handle.as_ref().map(|c| c.0.clone()),
                room.archived as i32,
                room.created_by.as_str(),
                room.created_at.to_rfc3339(),
                room.invited_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO room_members (room_id, election_id, round, account, contact_handle, added_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for member in members {
                inserted += stmt.execute(params![
                    member.room_id.to_string(),
                    member.election_id,
                    member.round,
                    member.account,
                    member.contact_handle,
                    member.added_at.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    #[instrument(skip(self))]
    pub fn set_chat_handle(&self, room_id: Uuid, chat: &ChatHandle) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET chat_handle = ?1 WHERE id = ?2",
            params![chat.0, room_id.to_string()],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn mark_invited(&self, room_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET invited_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), room_id.to_string()],
        )?;
        Ok(())
    }

    /// Archive a room. Rooms are never deleted.
    #[instrument(skip(self))]
    pub fn archive(&self, room_id: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET archived = 1 WHERE id = ?1",
            params![room_id.to_string()],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn list_members(&self, room_id: Uuid) -> Result<Vec<RoomMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT room_id, election_id, round, account, contact_handle, added_at
             FROM room_members WHERE room_id = ?1 ORDER BY account",
        )?;
        let members = stmt
            .query_map(params![room_id.to_string()], member_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }

    #[instrument(skip(self))]
    pub fn count_members(&self, room_id: Uuid) -> Result<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM room_members WHERE room_id = ?1",
            params![room_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Every member seated in a round
    #[instrument(skip(self))]
    pub fn list_members_for_round(&self, election_id: i64, round: u8) -> Result<Vec<RoomMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT room_id, election_id, round, account, contact_handle, added_at
             FROM room_members WHERE election_id = ?1 AND round = ?2 ORDER BY account",
        )?;
        let members = stmt
            .query_map(params![election_id, round], member_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }
}
