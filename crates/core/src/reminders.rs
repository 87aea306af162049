//! Reminder scheduling
//!
//! Definitions are stored once per election (and per round for round-end
//! reminders). Each tick fires the definitions whose window contains the
//! current time, skipping every recipient that already has a delivery row.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::chain::ChainSource;
use crate::config::{DeliveryMode, ReminderConfig};
use crate::error::{Error, Result};
use crate::messaging::{Button, Messenger};
use crate::models::{DeliveryOutcome, Election, ReminderDefinition, ReminderDelivery, ReminderGroup};
use crate::storage::Storage;

/// Which reminder is being rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    ElectionStart { minutes_before: u32 },
    RoundEnd { round: u8, minutes_before: u32 },
}

impl ReminderKind {
    /// Fails for a round-end definition stored without its round
    pub fn of(def: &ReminderDefinition) -> Result<Self> {
        Ok(match def.group {
            ReminderGroup::ElectionStart => ReminderKind::ElectionStart {
                minutes_before: def.offset_minutes,
            },
            ReminderGroup::RoundEnd => ReminderKind::RoundEnd {
                round: def.round.ok_or_else(|| {
                    Error::Inconsistent(format!("round reminder {} has no round", def.id))
                })?,
                minutes_before: def.offset_minutes,
            },
        })
    }
}

/// Recipient details available to the renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderContext {
    pub account: String,
    /// Election start or round end
    pub anchor: DateTime<Utc>,
    /// Room of the recipient, for round reminders
    pub room_name: Option<String>,
}

/// A rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub buttons: Vec<Button>,
}

/// Localization collaborator
pub trait ReminderText {
    fn render(&self, kind: &ReminderKind, ctx: &ReminderContext) -> Rendered;
}

/// Built-in English texts
#[derive(Debug, Clone, Default)]
pub struct PlainText {
    /// Link attached to round reminders as a "Vote" button
    pub vote_url: Option<String>,
}

impl ReminderText for PlainText {
    fn render(&self, kind: &ReminderKind, ctx: &ReminderContext) -> Rendered {
        match kind {
            ReminderKind::ElectionStart { minutes_before } => Rendered {
                text: format!(
                    "Hello {}, the election starts in {} ({} UTC). Please be ready to join your room.",
                    ctx.account,
                    format_lead(*minutes_before),
                    ctx.anchor.format("%Y-%m-%d %H:%M")
                ),
                buttons: Vec::new(),
            },
            ReminderKind::RoundEnd {
                round,
                minutes_before,
            } => {
                let room = ctx
                    .room_name
                    .as_ref()
                    .map(|name| format!(" in {}", name))
                    .unwrap_or_default();
                Rendered {
                    text: format!(
                        "Round {} ends in {}. You have not voted yet{}.",
                        round + 1,
                        format_lead(*minutes_before),
                        room
                    ),
                    buttons: self
                        .vote_url
                        .iter()
                        .map(|url| Button {
                            label: "Vote".to_string(),
                            url: url.clone(),
                        })
                        .collect(),
                }
            }
        }
    }
}

/// "1 day", "2 hours", "10 minutes"
fn format_lead(minutes: u32) -> String {
    let (value, unit) = if minutes >= 1440 && minutes % 1440 == 0 {
        (minutes / 1440, "day")
    } else if minutes >= 60 && minutes % 60 == 0 {
        (minutes / 60, "hour")
    } else {
        (minutes, "minute")
    };

    if value == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", value, unit)
    }
}

/// What one firing pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderReport {
    /// Definitions whose window contained `now`
    pub due: u32,
    pub sent: u32,
    pub failed: u32,
    /// Recipients skipped because a delivery row exists
    pub skipped: u32,
}

#[derive(Debug, Clone)]
struct Recipient {
    account: String,
    handle: String,
    room_name: Option<String>,
}

pub struct ReminderScheduler<'a, S, C, M, T>
where
    S: Storage,
    C: ChainSource + ?Sized,
    M: Messenger + ?Sized,
    T: ReminderText + ?Sized,
{
    store: &'a S,
    chain: &'a C,
    messenger: &'a M,
    text: &'a T,
    settings: &'a ReminderConfig,
}

impl<'a, S, C, M, T> ReminderScheduler<'a, S, C, M, T>
where
    S: Storage,
    C: ChainSource + ?Sized,
    M: Messenger + ?Sized,
    T: ReminderText + ?Sized,
{
    pub fn new(
        store: &'a S,
        chain: &'a C,
        messenger: &'a M,
        text: &'a T,
        settings: &'a ReminderConfig,
    ) -> Self {
        Self {
            store,
            chain,
            messenger,
            text,
            settings,
        }
    }

    /// Store election-start definitions. Returns how many were new.
    #[instrument(skip(self, election), fields(election_id = election.id))]
    pub fn ensure_election_start(&self, election: &Election) -> Result<u32> {
        let mut created = 0;
        for &offset in &self.settings.election_start_offsets {
            let def = ReminderDefinition::new(
                election.id,
                ReminderGroup::ElectionStart,
                offset,
                None,
                election.start_at,
            );
            if self.store.ensure_reminder(&def)? {
                created += 1;
            }
        }
        if created > 0 {
            info!(created, "Election start reminders scheduled");
        }
        Ok(created)
    }

    /// Store round-end definitions for `round`. Returns how many were new.
    #[instrument(skip(self, election), fields(election_id = election.id))]
    pub fn ensure_round_end(
        &self,
        election: &Election,
        round: u8,
        round_end: DateTime<Utc>,
    ) -> Result<u32> {
        let mut created = 0;
        for &offset in &self.settings.round_end_offsets {
            let def = ReminderDefinition::new(
                election.id,
                ReminderGroup::RoundEnd,
                offset,
                Some(round),
                round_end,
            );
            if self.store.ensure_reminder(&def)? {
                created += 1;
            }
        }
        if created > 0 {
            info!(created, round, "Round end reminders scheduled");
        }
        Ok(created)
    }

    /// Send every due reminder to every recipient without a delivery row.
    ///
    /// Chain and messaging failures are absorbed per definition or per
    /// recipient; storage failures propagate.
    #[instrument(skip(self, election), fields(election_id = election.id))]
    pub fn fire_due_reminders(
        &self,
        election: &Election,
        now: DateTime<Utc>,
        group: Option<ReminderGroup>,
    ) -> Result<ReminderReport> {
        let mut report = ReminderReport::default();

        for def in self.store.list_reminders(election.id, group)? {
            if !def.is_due(now, self.settings.window_minutes) {
                continue;
            }
            report.due += 1;

            let kind = match ReminderKind::of(&def) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(reminder_id = %def.id, error = %e, "Skipping reminder definition");
                    continue;
                }
            };

            let recipients = match self.audience(election, &kind) {
                Ok(recipients) => recipients,
                Err(e @ Error::Chain(_)) => {
                    warn!(reminder_id = %def.id, error = %e, "Reminder audience unavailable");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let delivered = self.store.delivered_accounts(def.id)?;

            for recipient in recipients {
                if delivered.contains(&recipient.account) {
                    report.skipped += 1;
                    continue;
                }
                match self.deliver(&def, &kind, &recipient, now)? {
                    Some(DeliveryOutcome::Sent) => report.sent += 1,
                    Some(_) => report.failed += 1,
                    None => report.skipped += 1,
                }
            }
        }

        if report.sent > 0 || report.failed > 0 {
            info!(
                due = report.due,
                sent = report.sent,
                failed = report.failed,
                "Reminders fired"
            );
        }
        Ok(report)
    }

    /// Recipients of a definition that have a contact handle
    fn audience(&self, election: &Election, kind: &ReminderKind) -> Result<Vec<Recipient>> {
        match *kind {
            ReminderKind::ElectionStart { .. } => {
                let accounts: Vec<String> = self.chain.participants(None)?.into_keys().collect();
                let handles = self.store.find_contacts(&accounts)?;
                Ok(accounts
                    .into_iter()
                    .filter_map(|account| {
                        handles.get(&account).map(|handle| Recipient {
                            handle: handle.clone(),
                            account,
                            room_name: None,
                        })
                    })
                    .collect())
            }
            ReminderKind::RoundEnd { round, .. } => {
                let records = self.chain.participants(None)?;
                let rooms: HashMap<_, _> = self
                    .store
                    .list_rooms_for_round(election.id, round)?
                    .into_iter()
                    .map(|room| (room.id, room.short_name))
                    .collect();

                let members = self.store.list_round_members(election.id, round)?;
                Ok(members
                    .into_iter()
                    .filter(|m| {
                        matches!(records.get(&m.account), Some(r) if r.candidate.is_none())
                    })
                    .filter_map(|m| {
                        let handle = m.contact_handle?;
                        Some(Recipient {
                            room_name: rooms.get(&m.room_id).cloned(),
                            account: m.account,
                            handle,
                        })
                    })
                    .collect())
            }
        }
    }

    /// Attempt one delivery. None if the recipient was already reserved.
    fn deliver(
        &self,
        def: &ReminderDefinition,
        kind: &ReminderKind,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryOutcome>> {
        if self.settings.delivery_mode == DeliveryMode::ReserveBeforeSend
            && !self.store.reserve_delivery(def.id, &recipient.account, now)?
        {
            debug!(reminder_id = %def.id, account = %recipient.account, "Already reserved");
            return Ok(None);
        }

        let ctx = ReminderContext {
            account: recipient.account.clone(),
            anchor: def.anchor(),
            room_name: recipient.room_name.clone(),
        };
        let rendered = self.text.render(kind, &ctx);

        let outcome = match self
            .messenger
            .send_message(&recipient.handle, &rendered.text, &rendered.buttons)
        {
            Ok(true) => DeliveryOutcome::Sent,
            Ok(false) => {
                warn!(reminder_id = %def.id, account = %recipient.account, "Reminder refused by transport");
                DeliveryOutcome::Error
            }
            Err(e) => {
                warn!(reminder_id = %def.id, account = %recipient.account, error = %e, "Reminder send failed");
                DeliveryOutcome::Error
            }
        };

        self.store.record_delivery(&ReminderDelivery {
            reminder_id: def.id,
            account: recipient.account.clone(),
            outcome,
            attempted_at: now,
        })?;
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RawPhase;
    use crate::models::{PhaseKind, Room, RoomMember};
    use crate::storage::{Database, ElectionRepository, ReminderRepository, RoomRepository};
    use crate::testkit::{account, register_contacts, RecordingMessenger, ScriptedChain};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 5, 13, 0, 0).unwrap()
    }

    fn setup(participants: usize) -> (Database, Election, ScriptedChain) {
        let db = Database::open_in_memory().unwrap();
        let mut election = Election::new("genesis.eden", start(), PhaseKind::Registration);
        election.id = db.create_election(&election).unwrap();
        let chain = ScriptedChain::new(RawPhase::new(
            "election_state_registration_v1",
            json!({"start_time": "2024-10-05T13:00:00"}),
        ));
        chain.seat(0, participants);
        register_contacts(&db, participants);
        (db, election, chain)
    }

    fn settings(offsets: Vec<u32>, mode: DeliveryMode) -> ReminderConfig {
        ReminderConfig {
            election_start_offsets: offsets,
            delivery_mode: mode,
            ..ReminderConfig::default()
        }
    }

    #[test]
    fn test_fires_once_per_recipient() {
        let (db, election, chain) = setup(3);
        let messenger = RecordingMessenger::new();
        let settings = settings(vec![60], DeliveryMode::RecordAfterSend);
        let text = PlainText::default();
        let scheduler = ReminderScheduler::new(&db, &chain, &messenger, &text, &settings);
        assert_eq!(scheduler.ensure_election_start(&election).unwrap(), 1);

        let report = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(55), None)
            .unwrap();
        assert_eq!(report.sent, 3);

        let report = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(50) - Duration::seconds(1), None)
            .unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 3);

        assert_eq!(messenger.sent_to("@member000").len(), 1);
        assert!(messenger.sent_to("@member000")[0].contains("starts in 1 hour"));
        let def = &db.list_reminders(election.id, None).unwrap()[0];
        assert_eq!(db.count_deliveries(def.id, DeliveryOutcome::Sent).unwrap(), 3);
    }

    #[test]
    fn test_outside_window_is_not_due() {
        let (db, election, chain) = setup(2);
        let messenger = RecordingMessenger::new();
        let settings = settings(vec![60], DeliveryMode::RecordAfterSend);
        let text = PlainText::default();
        let scheduler = ReminderScheduler::new(&db, &chain, &messenger, &text, &settings);
        scheduler.ensure_election_start(&election).unwrap();

        let early = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(61), None)
            .unwrap();
        let late = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(50), None)
            .unwrap();

        assert_eq!(early.due, 0);
        assert_eq!(late.due, 0);
        assert_eq!(messenger.sends(), 0);
    }

    #[test]
    fn test_error_is_not_retried() {
        let (db, election, chain) = setup(2);
        let messenger = RecordingMessenger::new();
        messenger.refuse.borrow_mut().insert("@member001".to_string());
        let settings = settings(vec![10], DeliveryMode::RecordAfterSend);
        let text = PlainText::default();
        let scheduler = ReminderScheduler::new(&db, &chain, &messenger, &text, &settings);
        scheduler.ensure_election_start(&election).unwrap();

        let first = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(9), None)
            .unwrap();
        assert_eq!(first.sent, 1);
        assert_eq!(first.failed, 1);

        messenger.refuse.borrow_mut().clear();
        let second = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(5), None)
            .unwrap();
        assert_eq!(second.sent, 0);
        assert_eq!(messenger.sent_to("@member001").len(), 1);

        let def = &db.list_reminders(election.id, None).unwrap()[0];
        assert_eq!(
            db.find_delivery(def.id, &account(1)).unwrap().unwrap().outcome,
            DeliveryOutcome::Error
        );
    }

    #[test]
    fn test_reserve_before_send() {
        let (db, election, chain) = setup(3);
        let messenger = RecordingMessenger::new();
        let settings = settings(vec![60], DeliveryMode::ReserveBeforeSend);
        let text = PlainText::default();
        let scheduler = ReminderScheduler::new(&db, &chain, &messenger, &text, &settings);
        scheduler.ensure_election_start(&election).unwrap();

        // A reservation left behind by an interrupted tick
        let def = db.list_reminders(election.id, None).unwrap().remove(0);
        db.reserve_delivery(def.id, &account(0), start()).unwrap();

        let report = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(58), None)
            .unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.skipped, 1);
        assert!(messenger.sent_to("@member000").is_empty());
        assert_eq!(db.count_deliveries(def.id, DeliveryOutcome::Sent).unwrap(), 2);
        assert_eq!(db.count_deliveries(def.id, DeliveryOutcome::Pending).unwrap(), 1);
    }

    #[test]
    fn test_round_end_reaches_only_non_voters() {
        let (db, election, chain) = setup(4);
        let room = Room::new(election.id, 0, 0, "Eden 1.1".into(), "Eden Round 1, Room 1".into());
        let members: Vec<RoomMember> = (0..4)
            .map(|i| RoomMember::new(&room, 0, account(i), Some(format!("@{}", account(i)))))
            .collect();
        db.materialize_room(&room, &members).unwrap();
        chain.vote(&account(0), &account(2));
        chain.vote(&account(1), &account(2));

        let messenger = RecordingMessenger::new();
        let settings = ReminderConfig {
            round_end_offsets: vec![10],
            ..ReminderConfig::default()
        };
        let text = PlainText {
            vote_url: Some("https://genesis.eden.app/election".into()),
        };
        let scheduler = ReminderScheduler::new(&db, &chain, &messenger, &text, &settings);
        let end = start() + Duration::hours(1);
        scheduler.ensure_round_end(&election, 0, end).unwrap();

        let report = scheduler
            .fire_due_reminders(
                &election,
                end - Duration::minutes(5),
                Some(ReminderGroup::RoundEnd),
            )
            .unwrap();

        assert_eq!(report.sent, 2);
        assert!(messenger.sent_to("@member000").is_empty());
        let text = messenger.sent_to("@member003");
        assert_eq!(
            text,
            vec!["Round 1 ends in 10 minutes. You have not voted yet in Eden 1.1.".to_string()]
        );
    }

    #[test]
    fn test_chain_failure_skips_definition() {
        let (db, election, chain) = setup(2);
        chain.fail_participants.set(true);
        let messenger = RecordingMessenger::new();
        let settings = settings(vec![60], DeliveryMode::RecordAfterSend);
        let text = PlainText::default();
        let scheduler = ReminderScheduler::new(&db, &chain, &messenger, &text, &settings);
        scheduler.ensure_election_start(&election).unwrap();

        let report = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(55), None)
            .unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.sent, 0);

        chain.fail_participants.set(false);
        let report = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(54), None)
            .unwrap();
        assert_eq!(report.sent, 2);
    }

    #[test]
    fn test_round_reminder_without_round_is_skipped() {
        let (db, election, chain) = setup(2);
        let messenger = RecordingMessenger::new();
        let settings = settings(vec![], DeliveryMode::RecordAfterSend);
        let text = PlainText::default();
        let scheduler = ReminderScheduler::new(&db, &chain, &messenger, &text, &settings);
        let def = ReminderDefinition::new(election.id, ReminderGroup::RoundEnd, 10, None, start());
        assert!(db.ensure_reminder(&def).unwrap());
        assert!(matches!(ReminderKind::of(&def), Err(Error::Inconsistent(_))));

        let report = scheduler
            .fire_due_reminders(&election, start() - Duration::minutes(8), None)
            .unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(messenger.sends(), 0);
    }

    #[test]
    fn test_definitions_are_created_once() {
        let (db, election, chain) = setup(1);
        let messenger = RecordingMessenger::new();
        let settings = ReminderConfig::default();
        let text = PlainText::default();
        let scheduler = ReminderScheduler::new(&db, &chain, &messenger, &text, &settings);

        assert_eq!(scheduler.ensure_election_start(&election).unwrap(), 3);
        assert_eq!(scheduler.ensure_election_start(&election).unwrap(), 0);
        assert_eq!(scheduler.ensure_round_end(&election, 0, start()).unwrap(), 1);
        assert_eq!(scheduler.ensure_round_end(&election, 1, start()).unwrap(), 1);
        assert_eq!(scheduler.ensure_round_end(&election, 1, start()).unwrap(), 0);
    }

    #[test]
    fn test_format_lead() {
        assert_eq!(format_lead(1440), "1 day");
        assert_eq!(format_lead(2880), "2 days");
        assert_eq!(format_lead(60), "1 hour");
        assert_eq!(format_lead(90), "90 minutes");
        assert_eq!(format_lead(1), "1 minute");
    }
}
