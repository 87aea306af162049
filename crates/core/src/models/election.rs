//! Election model - one election cycle driven by the chain contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse lifecycle stage of an election, as persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Pending,
    Registration,
    Seeding,
    InitVoters,
    Active,
    Final,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Pending => "pending",
            PhaseKind::Registration => "registration",
            PhaseKind::Seeding => "seeding",
            PhaseKind::InitVoters => "init_voters",
            PhaseKind::Active => "active",
            PhaseKind::Final => "final",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhaseKind::Pending),
            "registration" => Some(PhaseKind::Registration),
            "seeding" => Some(PhaseKind::Seeding),
            "init_voters" => Some(PhaseKind::InitVoters),
            "active" => Some(PhaseKind::Active),
            "final" => Some(PhaseKind::Final),
            _ => None,
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The round currently being voted on, or the final (chief delegate) stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LiveRound {
    Round(u8),
    Final,
}

impl LiveRound {
    /// Stored value of [`LiveRound::Final`]
    pub const FINAL_SENTINEL: i64 = 999;

    pub fn number(&self) -> Option<u8> {
        match self {
            LiveRound::Round(n) => Some(*n),
            LiveRound::Final => None,
        }
    }

    pub fn to_db(self) -> i64 {
        match self {
            LiveRound::Round(n) => n as i64,
            LiveRound::Final => Self::FINAL_SENTINEL,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            Self::FINAL_SENTINEL => Some(LiveRound::Final),
            n if (0..=u8::MAX as i64).contains(&n) => Some(LiveRound::Round(n as u8)),
            _ => None,
        }
    }
}

impl std::fmt::Display for LiveRound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveRound::Round(n) => write!(f, "round {}", n + 1),
            LiveRound::Final => write!(f, "final"),
        }
    }
}

/// One election cycle of a contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    /// Row id, assigned on insert
    pub id: i64,
    pub contract: String,
    pub start_at: DateTime<Utc>,
    pub phase: PhaseKind,
    /// None until the first active round is observed
    pub live_round: Option<LiveRound>,
    /// End of the live round as last reported by the chain
    pub round_end_at: Option<DateTime<Utc>>,
    /// Closed round whose post-round cleanup has not completed yet
    pub cleanup_round: Option<u8>,
    /// End time of `cleanup_round`, for its vote report
    pub cleanup_round_end: Option<DateTime<Utc>>,
    /// Anchor row for rooms created ahead of the election
    pub is_dummy: bool,
    pub created_at: DateTime<Utc>,
}

impl Election {
    pub fn new(contract: impl Into<String>, start_at: DateTime<Utc>, phase: PhaseKind) -> Self {
        Self {
            id: 0,
            contract: contract.into(),
            start_at,
            phase,
            live_round: None,
            round_end_at: None,
            cleanup_round: None,
            cleanup_round_end: None,
            is_dummy: false,
            created_at: Utc::now(),
        }
    }

    /// Dummy anchor election for pre-created rooms of a contract
    pub fn dummy(contract: impl Into<String>, start_at: DateTime<Utc>) -> Self {
        Self {
            is_dummy: true,
            ..Self::new(contract, start_at, PhaseKind::Pending)
        }
    }
}
