//! Chain query collaborator
//!
//! The core never talks to a node directly. Adapters implement
//! [`ChainSource`]; raw phase payloads are parsed once into [`ChainPhase`].

mod payload;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use payload::{parse_chain_time, ChainPhase, RoundConfig};

/// Phase tag and untyped payload exactly as the contract reports them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPhase {
    pub tag: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawPhase {
    pub fn new(tag: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }

    /// Parse into a typed phase, failing on unknown tags or missing fields
    pub fn parse(&self) -> Result<ChainPhase> {
        ChainPhase::parse(&self.tag, &self.payload)
    }
}

/// A participant's row in the contract's vote table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    /// Round the participant is currently seated in
    #[serde(default)]
    pub round: Option<u8>,
    /// Zero-based rank within the round, the allocation key
    #[serde(default)]
    pub index: Option<u16>,
    /// Candidate voted for in the current round
    #[serde(default)]
    pub candidate: Option<String>,
}

/// Inclusive time range for action searches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

/// One contract action found by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub block_height: u64,
    #[serde(deserialize_with = "payload::deserialize_chain_time")]
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Read access to the election contract.
///
/// `height` pins a query to a block; `None` means the live head.
/// Paginated searches must stop on cursor exhaustion.
pub trait ChainSource {
    /// Current election phase tag and payload
    fn current_phase(&self, height: Option<u64>) -> Result<RawPhase>;

    /// Vote table keyed by account
    fn participants(&self, height: Option<u64>) -> Result<BTreeMap<String, ParticipantRecord>>;

    /// Height of the last block produced at or before `at`
    fn block_height_at(&self, at: DateTime<Utc>) -> Result<u64>;

    /// Actions named `action` on `account` within `range`
    fn actions_matching(
        &self,
        account: &str,
        action: &str,
        range: TimeRange,
    ) -> Result<Vec<ActionRecord>>;
}
