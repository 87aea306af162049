//! Room model - one discussion group of a round

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Externally visible handle of a chat created by the messenger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatHandle(pub String);

impl std::fmt::Display for ChatHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who created a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomOrigin {
    /// Created ahead of the election, anchored to the dummy election
    Precreated,
    /// Created while materializing a live round
    Live,
}

impl RoomOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomOrigin::Precreated => "precreated",
            RoomOrigin::Live => "live",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "precreated" => Some(RoomOrigin::Precreated),
            "live" => Some(RoomOrigin::Live),
            _ => None,
        }
    }
}

/// A room belongs to exactly one (election, round, room_index) once assigned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub election_id: i64,
    /// None while the room is pre-created and unassigned
    pub round: Option<u8>,
    pub room_index: Option<u16>,
    pub short_name: String,
    pub long_name: String,
    pub chat_handle: Option<ChatHandle>,
    pub archived: bool,
    pub created_by: RoomOrigin,
    pub created_at: DateTime<Utc>,
    /// Set once every member with a contact handle was invited to the chat
    pub invited_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn new(
        election_id: i64,
        round: u8,
        room_index: u16,
        short_name: String,
        long_name: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            election_id,
            round: Some(round),
            room_index: Some(room_index),
            short_name,
            long_name,
            chat_handle: None,
            archived: false,
            created_by: RoomOrigin::Live,
            created_at: Utc::now(),
            invited_at: None,
        }
    }

    /// A room created ahead of time, anchored to a dummy election
    pub fn precreated(dummy_election_id: i64, short_name: String, long_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            election_id: dummy_election_id,
            round: None,
            room_index: None,
            short_name,
            long_name,
            chat_handle: None,
            archived: false,
            created_by: RoomOrigin::Precreated,
            created_at: Utc::now(),
            invited_at: None,
        }
    }

    /// Room has a chat and every reachable member was invited
    pub fn is_settled(&self) -> bool {
        self.chat_handle.is_some() && self.invited_at.is_some()
    }
}

/// A participant bound to a room for one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub room_id: Uuid,
    pub election_id: i64,
    pub round: u8,
    pub account: String,
    /// Cached messenger handle, if the account registered one
    pub contact_handle: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl RoomMember {
    pub fn new(room: &Room, round: u8, account: String, contact_handle: Option<String>) -> Self {
        Self {
            room_id: room.id,
            election_id: room.election_id,
            round,
            account,
            contact_handle,
            added_at: Utc::now(),
        }
    }
}
