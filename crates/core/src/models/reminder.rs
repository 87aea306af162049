//! Reminder definitions and delivery records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Family of reminders sharing an anchor and an audience
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReminderGroup {
    /// Anchored at the election start, sent to every participant
    ElectionStart,
    /// Anchored at the end of an active round, sent to members who have not voted
    RoundEnd,
}

impl ReminderGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderGroup::ElectionStart => "election-start",
            ReminderGroup::RoundEnd => "round-end",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "election-start" => Some(ReminderGroup::ElectionStart),
            "round-end" => Some(ReminderGroup::RoundEnd),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReminderGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rule: fire `offset_minutes` before an anchor time, for one audience.
/// Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDefinition {
    pub id: Uuid,
    pub election_id: i64,
    pub group: ReminderGroup,
    pub offset_minutes: u32,
    pub round: Option<u8>,
    /// Anchor time minus the offset; the window opens here
    pub fire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ReminderDefinition {
    pub fn new(
        election_id: i64,
        group: ReminderGroup,
        offset_minutes: u32,
        round: Option<u8>,
        anchor: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            election_id,
            group,
            offset_minutes,
            round,
            fire_at: anchor - Duration::minutes(offset_minutes as i64),
            created_at: Utc::now(),
        }
    }

    /// The anchor this definition was derived from
    pub fn anchor(&self) -> DateTime<Utc> {
        self.fire_at + Duration::minutes(self.offset_minutes as i64)
    }

    /// Due iff `fire_at <= now < fire_at + window`
    pub fn is_due(&self, now: DateTime<Utc>, window_minutes: u32) -> bool {
        let closes_at = self.fire_at + Duration::minutes(window_minutes as i64);
        self.fire_at <= now && now < closes_at
    }
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    /// Reserved before sending; only written in reserve-before-send mode
    Pending,
    Sent,
    Error,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Pending => "pending",
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryOutcome::Pending),
            "sent" => Some(DeliveryOutcome::Sent),
            "error" => Some(DeliveryOutcome::Error),
            _ => None,
        }
    }
}

/// Proof that a reminder was attempted for a recipient.
/// At most one per (reminder_id, account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDelivery {
    pub reminder_id: Uuid,
    pub account: String,
    pub outcome: DeliveryOutcome,
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 5, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_fire_at_is_anchor_minus_offset() {
        let def = ReminderDefinition::new(1, ReminderGroup::ElectionStart, 60, None, anchor());
        assert_eq!(def.fire_at, anchor() - Duration::minutes(60));
        assert_eq!(def.anchor(), anchor());
    }

    #[test]
    fn test_due_window_is_half_open() {
        let def = ReminderDefinition::new(1, ReminderGroup::ElectionStart, 60, None, anchor());
        let t = anchor() - Duration::minutes(60);

        assert!(!def.is_due(t - Duration::seconds(1), 10));
        assert!(def.is_due(t, 10));
        assert!(def.is_due(t + Duration::minutes(5), 10));
        assert!(!def.is_due(t + Duration::minutes(10), 10));
    }

    #[test]
    fn test_group_names() {
        assert_eq!(
            ReminderGroup::from_str("round-end"),
            Some(ReminderGroup::RoundEnd)
        );
        assert_eq!(ReminderGroup::ElectionStart.as_str(), "election-start");
        assert_eq!(ReminderGroup::from_str("video"), None);
    }
}
