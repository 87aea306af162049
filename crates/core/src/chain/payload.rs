//! Typed election phase payloads

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::models::{LiveRound, PhaseKind};

/// Contract round configuration entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    pub num_participants: u32,
    pub num_groups: u32,
}

/// Election phase as reported by the contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainPhase {
    /// No election date scheduled yet
    Pending,
    Registration {
        start_time: DateTime<Utc>,
    },
    /// Randomness seeding; the election starts when seeding ends
    Seeding {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
    InitVoters,
    Active {
        round: u8,
        /// Round table; None while the contract tallies the round
        config: Option<Vec<RoundConfig>>,
        round_end: Option<DateTime<Utc>>,
    },
    Final,
}

/// Parse a chain timestamp. Nodes often omit the zone; UTC is implied.
pub fn parse_chain_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub(crate) fn deserialize_chain_time<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_chain_time(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid chain timestamp '{}'", s)))
}

fn deserialize_chain_time_opt<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_chain_time(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid chain timestamp '{}'", s))),
        None => Ok(None),
    }
}

#[derive(Deserialize)]
struct RegistrationPayload {
    #[serde(deserialize_with = "deserialize_chain_time")]
    start_time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct SeedPayload {
    #[serde(deserialize_with = "deserialize_chain_time")]
    start_time: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_chain_time")]
    end_time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct SeedingPayload {
    seed: SeedPayload,
}

#[derive(Deserialize)]
struct ActivePayload {
    round: u8,
    config: Vec<RoundConfig>,
    #[serde(default, deserialize_with = "deserialize_chain_time_opt")]
    round_end: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PostRoundPayload {
    prev_round: u8,
}

/// Strip `election_state_` and a trailing `_vN`
fn normalize_tag(tag: &str) -> &str {
    let tag = tag.strip_prefix("election_state_").unwrap_or(tag);
    match tag.rfind("_v") {
        Some(pos)
            if pos + 2 < tag.len() && tag[pos + 2..].chars().all(|c| c.is_ascii_digit()) =>
        {
            &tag[..pos]
        }
        _ => tag,
    }
}

fn decode<T: DeserializeOwned>(tag: &str, payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::MalformedPayload(format!("{}: {}", tag, e)))
}

impl ChainPhase {
    pub fn parse(tag: &str, payload: &serde_json::Value) -> Result<Self> {
        let phase = match normalize_tag(tag) {
            "pending_date" | "pending" => ChainPhase::Pending,
            "registration" => {
                let p: RegistrationPayload = decode(tag, payload)?;
                ChainPhase::Registration {
                    start_time: p.start_time,
                }
            }
            "seeding" => {
                let p: SeedingPayload = decode(tag, payload)?;
                ChainPhase::Seeding {
                    start_time: p.seed.start_time,
                    end_time: p.seed.end_time,
                }
            }
            "init_voters" => ChainPhase::InitVoters,
            "active" => {
                let p: ActivePayload = decode(tag, payload)?;
                ChainPhase::Active {
                    round: p.round,
                    config: Some(p.config),
                    round_end: p.round_end,
                }
            }
            // Still the previous round while the contract tallies it
            "post_round" => {
                let p: PostRoundPayload = decode(tag, payload)?;
                ChainPhase::Active {
                    round: p.prev_round,
                    config: None,
                    round_end: None,
                }
            }
            "final" => ChainPhase::Final,
            other => {
                return Err(Error::MalformedPayload(format!(
                    "unknown election phase '{}'",
                    other
                )))
            }
        };
        Ok(phase)
    }

    pub fn kind(&self) -> PhaseKind {
        match self {
            ChainPhase::Pending => PhaseKind::Pending,
            ChainPhase::Registration { .. } => PhaseKind::Registration,
            ChainPhase::Seeding { .. } => PhaseKind::Seeding,
            ChainPhase::InitVoters => PhaseKind::InitVoters,
            ChainPhase::Active { .. } => PhaseKind::Active,
            ChainPhase::Final => PhaseKind::Final,
        }
    }

    /// Round reported by the chain, for phases that track one
    pub fn live_round(&self) -> Option<LiveRound> {
        match self {
            ChainPhase::Active { round, .. } => Some(LiveRound::Round(*round)),
            ChainPhase::Final => Some(LiveRound::Final),
            _ => None,
        }
    }

    /// Election start time, when the payload carries one
    pub fn election_start(&self) -> Option<DateTime<Utc>> {
        match self {
            ChainPhase::Registration { start_time } => Some(*start_time),
            ChainPhase::Seeding { end_time, .. } => Some(*end_time),
            _ => None,
        }
    }
}
