//! Round orchestration
//!
//! Turns a round reported by the chain into persisted rooms with members
//! and messenger chats, and tidies a round's rooms once it ends.
//!
//! Every step is check-then-act against storage, so running it again on the
//! next tick only redoes what is missing.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::chain::{ChainSource, TimeRange};
use crate::config::ElectionConfig;
use crate::error::{Error, Result};
use crate::groups::{compute_round_sizes, RoomLayout};
use crate::invariants::{assert_member_invariants, assert_room_invariants};
use crate::messaging::Messenger;
use crate::models::{ChatHandle, Election, Room, RoomMember};
use crate::storage::Storage;

/// Contract action carrying a vote
pub const VOTE_ACTION: &str = "electvote";

/// What one materialization pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Every room existed, was seated and settled; nothing was done
    pub already_complete: bool,
    pub rooms_created: u32,
    /// Pre-created rooms assigned to this round
    pub rooms_claimed: u32,
    pub members_seated: usize,
    pub rooms_settled: u32,
    /// Rooms whose chat setup failed and will be retried
    pub rooms_failed: u32,
}

/// What post-round cleanup did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub reports_posted: u32,
    pub rooms_archived: u32,
    pub automation_removed: u32,
}

#[derive(Debug, Deserialize)]
struct VoteAction {
    round: u8,
    voter: String,
    candidate: String,
}

pub struct RoundOrchestrator<'a, S, C, M>
where
    S: Storage,
    C: ChainSource + ?Sized,
    M: Messenger + ?Sized,
{
    store: &'a S,
    chain: &'a C,
    messenger: &'a M,
    settings: &'a ElectionConfig,
}

impl<'a, S, C, M> RoundOrchestrator<'a, S, C, M>
where
    S: Storage,
    C: ChainSource + ?Sized,
    M: Messenger + ?Sized,
{
    pub fn new(store: &'a S, chain: &'a C, messenger: &'a M, settings: &'a ElectionConfig) -> Self {
        Self {
            store,
            chain,
            messenger,
            settings,
        }
    }

    /// Make sure round `round` has `num_groups` seated and settled rooms.
    ///
    /// Participants are fetched and validated before any room is written.
    /// For every round but the last, a participant count other than
    /// `num_participants` aborts the round with [`Error::Inconsistent`].
    #[instrument(skip(self, election), fields(election_id = election.id))]
    pub fn ensure_round_materialized(
        &self,
        election: &Election,
        round: u8,
        num_participants: u32,
        num_groups: u32,
        is_last_round: bool,
        chain_height: Option<u64>,
    ) -> Result<RoundReport> {
        if num_participants == 0 || num_groups == 0 {
            return Err(Error::InvalidArgument(format!(
                "round {} needs participants and groups, got {} and {}",
                round + 1,
                num_participants,
                num_groups
            )));
        }

        let mut report = RoundReport::default();
        let existing = self.store.list_rooms_for_round(election.id, round)?;

        if existing.len() as u32 > num_groups {
            return Err(Error::Inconsistent(format!(
                "round {} has {} rooms, contract expects {}",
                round + 1,
                existing.len(),
                num_groups
            )));
        }

        if existing.len() as u32 == num_groups {
            let mut seated = Vec::with_capacity(existing.len());
            for room in &existing {
                let members = self.store.list_room_members(room.id)?;
                seated.push((room.clone(), members));
            }
            if seated.iter().all(|(_, members)| !members.is_empty()) {
                if seated.iter().all(|(room, _)| room.is_settled()) {
                    debug!(round, "Round already materialized");
                    report.already_complete = true;
                    return Ok(report);
                }
                self.settle_rooms(&seated, &mut report)?;
                return Ok(report);
            }
        }

        let seating = self.seating(round, num_participants, num_groups, is_last_round, chain_height)?;
        if round == 0 {
            self.check_first_round_shape(num_participants, num_groups);
        }

        let accounts: Vec<String> = seating.iter().flatten().cloned().collect();
        let handles = self.store.find_contacts(&accounts)?;

        let mut by_index: HashMap<u16, Room> = existing
            .into_iter()
            .filter_map(|room| room.room_index.map(|index| (index, room)))
            .collect();
        let mut spare = match self.store.find_dummy_election(&election.contract)? {
            Some(dummy) => self.store.list_unclaimed_rooms(dummy.id)?,
            None => Vec::new(),
        }
        .into_iter();

        let mut seated = Vec::with_capacity(seating.len());
        for (index, accounts) in seating.into_iter().enumerate() {
            let index = index as u16;
            let (short_name, long_name) = self.room_names(round, index);

            let room = match by_index.remove(&index) {
                Some(room) => room,
                None => match spare.next() {
                    Some(mut room) => {
                        room.election_id = election.id;
                        room.round = Some(round);
                        room.room_index = Some(index);
                        room.short_name = short_name;
                        room.long_name = long_name;
                        report.rooms_claimed += 1;
                        room
                    }
                    None => {
                        report.rooms_created += 1;
                        Room::new(election.id, round, index, short_name, long_name)
                    }
                },
            };
            assert_room_invariants(&room);

            let members: Vec<RoomMember> = accounts
                .into_iter()
                .map(|account| {
                    let handle = handles.get(&account).cloned();
                    RoomMember::new(&room, round, account, handle)
                })
                .collect();
            for member in &members {
                assert_member_invariants(member, &room);
            }

            report.members_seated += self.store.materialize_room(&room, &members)?;

            let stored = self.store.list_room_members(room.id)?;
            let expected: HashSet<&str> = members.iter().map(|m| m.account.as_str()).collect();
            if stored.len() != members.len()
                || !stored.iter().all(|m| expected.contains(m.account.as_str()))
            {
                return Err(Error::Inconsistent(format!(
                    "room {} of round {} holds {} members, allocation gives {}",
                    index + 1,
                    round + 1,
                    stored.len(),
                    members.len()
                )));
            }
            seated.push((room, stored));
        }

        info!(
            round,
            rooms = seated.len(),
            created = report.rooms_created,
            claimed = report.rooms_claimed,
            members = report.members_seated,
            "Round rooms recorded"
        );

        self.settle_rooms(&seated, &mut report)?;
        Ok(report)
    }

    /// Ranked accounts of a round split into rooms
    fn seating(
        &self,
        round: u8,
        num_participants: u32,
        num_groups: u32,
        is_last_round: bool,
        chain_height: Option<u64>,
    ) -> Result<Vec<Vec<String>>> {
        let records = self.chain.participants(chain_height)?;

        let mut ranked = Vec::new();
        for (account, record) in records {
            if record.round != Some(round) {
                continue;
            }
            let index = record.index.ok_or_else(|| {
                Error::Inconsistent(format!("{} has no rank in round {}", account, round + 1))
            })?;
            ranked.push((index, account));
        }
        ranked.sort();

        let count = ranked.len() as u32;
        if count != num_participants {
            if !is_last_round {
                return Err(Error::Inconsistent(format!(
                    "chain seats {} participants in round {}, expected {}",
                    count,
                    round + 1,
                    num_participants
                )));
            }
            warn!(
                round,
                seated = count,
                expected = num_participants,
                "Participant count differs in the last round"
            );
        }
        if count < num_groups {
            return Err(Error::Inconsistent(format!(
                "{} participants cannot fill {} rooms in round {}",
                count,
                num_groups,
                round + 1
            )));
        }

        let layout = RoomLayout::new(num_groups, count)?;
        let mut rooms = vec![Vec::new(); num_groups as usize];
        let mut previous: Option<u16> = None;
        for (position, (index, account)) in ranked.into_iter().enumerate() {
            if previous == Some(index) {
                return Err(Error::Inconsistent(format!(
                    "rank {} is held twice in round {}",
                    index,
                    round + 1
                )));
            }
            previous = Some(index);
            // The last round may have gaps; earlier rounds must rank densely
            if !is_last_round && index as usize != position {
                return Err(Error::Inconsistent(format!(
                    "rank {} of {} is out of sequence in round {}",
                    index,
                    account,
                    round + 1
                )));
            }
            let room = layout.room_of(position as u32)?;
            rooms[room as usize].push(account);
        }
        Ok(rooms)
    }

    fn check_first_round_shape(&self, num_participants: u32, num_groups: u32) {
        match compute_round_sizes(num_participants) {
            Ok(shapes) => {
                if let Some(first) = shapes.first() {
                    if first.group_count != num_groups {
                        warn!(
                            expected = first.group_count,
                            reported = num_groups,
                            "Contract group count differs from the local formula"
                        );
                    }
                }
            }
            Err(e) => warn!(error = %e, "Cannot compute round sizes"),
        }
    }

    fn room_names(&self, round: u8, index: u16) -> (String, String) {
        let prefix = &self.settings.room_name_prefix;
        (
            format!("{} {}.{}", prefix, round + 1, index + 1),
            format!("{} Round {}, Room {}", prefix, round + 1, index + 1),
        )
    }

    fn settle_rooms(&self, seated: &[(Room, Vec<RoomMember>)], report: &mut RoundReport) -> Result<()> {
        for (room, members) in seated {
            if room.is_settled() || self.settle_room(room, members)? {
                report.rooms_settled += 1;
            } else {
                report.rooms_failed += 1;
            }
        }
        Ok(())
    }

    /// Create the chat and invite reachable members. Messaging failures are
    /// logged and reported as `false`; the room is retried next tick.
    fn settle_room(&self, room: &Room, members: &[RoomMember]) -> Result<bool> {
        let chat = match &room.chat_handle {
            Some(chat) => chat.clone(),
            None => match self.open_chat(room)? {
                Some(chat) => chat,
                None => return Ok(false),
            },
        };

        let handles: Vec<String> = members
            .iter()
            .filter_map(|m| m.contact_handle.clone())
            .collect();
        if !handles.is_empty() {
            if let Err(e) = self.messenger.add_members(&chat, &handles) {
                warn!(room_id = %room.id, room_index = ?room.room_index, error = %e, "Inviting members failed");
                return Ok(false);
            }
            if self.settings.promote_participants {
                if let Err(e) = self.messenger.promote_members(&chat, &handles) {
                    warn!(room_id = %room.id, room_index = ?room.room_index, error = %e, "Promoting members failed");
                    return Ok(false);
                }
            }
        }

        self.store.mark_room_invited(room.id, Utc::now())?;
        Ok(true)
    }

    fn open_chat(&self, room: &Room) -> Result<Option<ChatHandle>> {
        match self.messenger.create_group(&room.long_name, &room.short_name) {
            Ok(chat) => {
                self.store.set_chat_handle(room.id, &chat)?;
                Ok(Some(chat))
            }
            Err(e) => {
                warn!(room_id = %room.id, room_index = ?room.room_index, error = %e, "Chat creation failed");
                Ok(None)
            }
        }
    }

    /// Create round 0 rooms ahead of the election, anchored to the dummy
    /// election. Only the shortfall is created. Returns the rooms created.
    #[instrument(skip(self, election), fields(election_id = election.id))]
    pub fn precreate_rooms(&self, election: &Election) -> Result<u32> {
        let dummy = self
            .store
            .find_dummy_election(&election.contract)?
            .ok_or_else(|| {
                Error::NotFound(format!("dummy election for {}", election.contract))
            })?;

        let registered = self.chain.participants(None)?.len() as u32;
        let Some(first) = compute_round_sizes(registered)?.into_iter().next() else {
            return Ok(0);
        };

        let spare = self.store.list_unclaimed_rooms(dummy.id)?;
        for room in spare.iter().filter(|r| r.chat_handle.is_none()) {
            self.open_chat(room)?;
        }

        let shortfall = first.group_count.saturating_sub(spare.len() as u32);
        for k in 0..shortfall {
            let number = spare.len() as u32 + k + 1;
            let prefix = &self.settings.room_name_prefix;
            let room = Room::precreated(
                dummy.id,
                format!("{} {}", prefix, number),
                format!("{} Room {}", prefix, number),
            );
            self.store.create_room(&room)?;
            self.open_chat(&room)?;
        }

        if shortfall > 0 {
            info!(
                registered,
                target = first.group_count,
                created = shortfall,
                "Rooms pre-created"
            );
        }
        Ok(shortfall)
    }

    /// Close round `round`: post the vote report, archive empty rooms and
    /// remove automation accounts from the rest
    #[instrument(skip(self, election), fields(election_id = election.id))]
    pub fn post_round_cleanup(
        &self,
        election: &Election,
        round: u8,
        round_end: Option<DateTime<Utc>>,
    ) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let rooms = self.store.list_rooms_for_round(election.id, round)?;
        if rooms.is_empty() {
            return Ok(report);
        }

        match round_end {
            Some(end) => match self.collect_votes(election, round, &rooms, end) {
                Ok(votes) => report.reports_posted = self.post_vote_reports(round, &rooms, &votes)?,
                Err(e) => warn!(round, error = %e, "Vote report skipped"),
            },
            None => debug!(round, "No round end recorded, vote report skipped"),
        }

        for room in &rooms {
            self.tidy_room(room, &mut report)?;
        }

        info!(
            round,
            reports = report.reports_posted,
            archived = report.rooms_archived,
            removed = report.automation_removed,
            "Round closed"
        );
        Ok(report)
    }

    /// Last vote per voter cast in `round`, up to the block at `end`
    fn collect_votes(
        &self,
        election: &Election,
        round: u8,
        rooms: &[Room],
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, String>> {
        let height = self.chain.block_height_at(end)?;
        let from = rooms.iter().map(|r| r.created_at).min().unwrap_or(end);
        let mut actions =
            self.chain
                .actions_matching(&election.contract, VOTE_ACTION, TimeRange { from, to: end })?;
        actions.retain(|a| a.block_height <= height);
        actions.sort_by_key(|a| (a.block_height, a.timestamp));

        let mut votes = HashMap::new();
        for action in actions {
            let vote: VoteAction = match serde_json::from_value(action.data) {
                Ok(vote) => vote,
                Err(e) => {
                    warn!(block = action.block_height, error = %e, "Skipping malformed vote");
                    continue;
                }
            };
            if vote.round == round {
                votes.insert(vote.voter, vote.candidate);
            }
        }
        Ok(votes)
    }

    fn post_vote_reports(
        &self,
        round: u8,
        rooms: &[Room],
        votes: &HashMap<String, String>,
    ) -> Result<u32> {
        let mut posted = 0;
        for room in rooms {
            let Some(chat) = &room.chat_handle else {
                continue;
            };
            let members = self.store.list_room_members(room.id)?;
            let text = vote_summary(round, room, &members, votes);
            match self.messenger.send_message(&chat.0, &text, &[]) {
                Ok(true) => posted += 1,
                Ok(false) => warn!(room_id = %room.id, "Vote report refused"),
                Err(e) => warn!(room_id = %room.id, error = %e, "Vote report failed"),
            }
        }
        Ok(posted)
    }

    fn tidy_room(&self, room: &Room, report: &mut CleanupReport) -> Result<()> {
        let Some(chat) = &room.chat_handle else {
            if self.store.count_room_members(room.id)? == 0 {
                self.store.archive_room(room.id)?;
                report.rooms_archived += 1;
            }
            return Ok(());
        };

        let members = match self.messenger.get_members(chat) {
            Ok(members) => members,
            Err(e) => {
                warn!(room_id = %room.id, error = %e, "Listing chat members failed");
                return Ok(());
            }
        };

        let automation: HashSet<&str> = self
            .settings
            .automation_accounts
            .iter()
            .map(String::as_str)
            .collect();
        let humans = members
            .iter()
            .filter(|m| !m.is_bot && !automation.contains(m.handle.as_str()))
            .count();

        if humans == 0 {
            self.store.archive_room(room.id)?;
            report.rooms_archived += 1;
            match self.messenger.delete_group(chat) {
                Ok(true) => info!(room_id = %room.id, "Empty room archived"),
                Ok(false) => warn!(room_id = %room.id, "Chat of archived room was not deleted"),
                Err(e) => warn!(room_id = %room.id, error = %e, "Deleting chat failed"),
            }
            return Ok(());
        }

        let bots: Vec<String> = members
            .iter()
            .filter(|m| automation.contains(m.handle.as_str()))
            .map(|m| m.handle.clone())
            .collect();
        if !bots.is_empty() {
            match self.messenger.remove_members(chat, &bots) {
                Ok(()) => report.automation_removed += bots.len() as u32,
                Err(e) => warn!(room_id = %room.id, error = %e, "Removing automation accounts failed"),
            }
        }
        Ok(())
    }
}

/// Text of the vote report posted to a room
fn vote_summary(
    round: u8,
    room: &Room,
    members: &[RoomMember],
    votes: &HashMap<String, String>,
) -> String {
    let mut tally: BTreeMap<&str, u32> = BTreeMap::new();
    let mut voted = 0;
    for member in members {
        if let Some(candidate) = votes.get(&member.account) {
            *tally.entry(candidate.as_str()).or_insert(0) += 1;
            voted += 1;
        }
    }

    let mut text = format!(
        "Round {} results for {}: {} of {} members voted.",
        round + 1,
        room.short_name,
        voted,
        members.len()
    );
    if tally.is_empty() {
        text.push_str("\nNo votes were cast.");
        return text;
    }

    let mut ranked: Vec<(&str, u32)> = tally.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    for (candidate, count) in ranked {
        text.push_str(&format!("\n{}: {}", candidate, count));
    }
    text
}
