//! Collaborator doubles for unit tests

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::chain::{ActionRecord, ChainSource, ParticipantRecord, RawPhase, TimeRange};
use crate::error::{Error, Result};
use crate::messaging::{Button, ChatMember, Messenger};
use crate::models::{ChatHandle, Contact};
use crate::storage::{ContactRepository, Database};

/// Account name used for generated participants
pub fn account(i: usize) -> String {
    format!("member{:03}", i)
}

/// Chain double whose state tests mutate between ticks
pub struct ScriptedChain {
    pub phase: RefCell<RawPhase>,
    pub participants: RefCell<BTreeMap<String, ParticipantRecord>>,
    pub actions: RefCell<Vec<ActionRecord>>,
    pub height: Cell<u64>,
    pub fail_phase: Cell<bool>,
    pub fail_participants: Cell<bool>,
    pub participant_calls: Cell<u32>,
}

impl ScriptedChain {
    pub fn new(phase: RawPhase) -> Self {
        Self {
            phase: RefCell::new(phase),
            participants: RefCell::new(BTreeMap::new()),
            actions: RefCell::new(Vec::new()),
            height: Cell::new(1_000),
            fail_phase: Cell::new(false),
            fail_participants: Cell::new(false),
            participant_calls: Cell::new(0),
        }
    }

    pub fn set_phase(&self, phase: RawPhase) {
        *self.phase.borrow_mut() = phase;
    }

    /// Seat `count` generated accounts in `round`, ranked in name order
    pub fn seat(&self, round: u8, count: usize) {
        let mut participants = self.participants.borrow_mut();
        participants.clear();
        for i in 0..count {
            participants.insert(
                account(i),
                ParticipantRecord {
                    round: Some(round),
                    index: Some(i as u16),
                    candidate: None,
                },
            );
        }
    }

    pub fn vote(&self, voter: &str, candidate: &str) {
        if let Some(record) = self.participants.borrow_mut().get_mut(voter) {
            record.candidate = Some(candidate.to_string());
        }
    }
}

impl ChainSource for ScriptedChain {
    fn current_phase(&self, _height: Option<u64>) -> Result<RawPhase> {
        if self.fail_phase.get() {
            return Err(Error::Chain("node timeout".into()));
        }
        Ok(self.phase.borrow().clone())
    }

    fn participants(&self, _height: Option<u64>) -> Result<BTreeMap<String, ParticipantRecord>> {
        self.participant_calls.set(self.participant_calls.get() + 1);
        if self.fail_participants.get() {
            return Err(Error::Chain("node unavailable".into()));
        }
        Ok(self.participants.borrow().clone())
    }

    fn block_height_at(&self, _at: DateTime<Utc>) -> Result<u64> {
        Ok(self.height.get())
    }

    fn actions_matching(
        &self,
        _account: &str,
        action: &str,
        range: TimeRange,
    ) -> Result<Vec<ActionRecord>> {
        if action != "electvote" {
            return Ok(Vec::new());
        }
        Ok(self
            .actions
            .borrow()
            .iter()
            .filter(|a| range.contains(a.timestamp))
            .cloned()
            .collect())
    }
}

/// One recorded messenger call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateGroup(String),
    AddMembers(ChatHandle, Vec<String>),
    PromoteMembers(ChatHandle, Vec<String>),
    RemoveMembers(ChatHandle, Vec<String>),
    Send(String, String),
    DeleteGroup(ChatHandle),
}

/// Messenger double recording every call, with injectable failures
#[derive(Default)]
pub struct RecordingMessenger {
    pub calls: RefCell<Vec<Call>>,
    next_chat: Cell<u32>,
    /// Group names whose creation fails
    pub fail_groups: RefCell<HashSet<String>>,
    /// Recipients the transport refuses
    pub refuse: RefCell<HashSet<String>>,
    /// Members reported per chat
    pub members: RefCell<HashMap<ChatHandle, Vec<ChatMember>>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups_created(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::CreateGroup(_)))
            .count()
    }

    /// Messages sent to one recipient
    pub fn sent_to(&self, recipient: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Send(to, text) if to == recipient => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sends(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Send(..)))
            .count()
    }

    pub fn set_members(&self, chat: &ChatHandle, humans: &[&str], bots: &[&str]) {
        let mut members: Vec<ChatMember> = humans
            .iter()
            .map(|h| ChatMember {
                handle: h.to_string(),
                is_bot: false,
            })
            .collect();
        members.extend(bots.iter().map(|b| ChatMember {
            handle: b.to_string(),
            is_bot: true,
        }));
        self.members.borrow_mut().insert(chat.clone(), members);
    }
}

impl Messenger for RecordingMessenger {
    fn create_group(&self, name: &str, _description: &str) -> Result<ChatHandle> {
        self.calls.borrow_mut().push(Call::CreateGroup(name.to_string()));
        if self.fail_groups.borrow().contains(name) {
            return Err(Error::Messaging(format!("cannot create '{}'", name)));
        }
        let n = self.next_chat.get() + 1;
        self.next_chat.set(n);
        Ok(ChatHandle(format!("chat-{}", n)))
    }

    fn add_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(Call::AddMembers(chat.clone(), handles.to_vec()));
        Ok(())
    }

    fn promote_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(Call::PromoteMembers(chat.clone(), handles.to_vec()));
        Ok(())
    }

    fn remove_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(Call::RemoveMembers(chat.clone(), handles.to_vec()));
        Ok(())
    }

    fn send_message(&self, recipient: &str, text: &str, _buttons: &[Button]) -> Result<bool> {
        self.calls
            .borrow_mut()
            .push(Call::Send(recipient.to_string(), text.to_string()));
        Ok(!self.refuse.borrow().contains(recipient))
    }

    fn delete_group(&self, chat: &ChatHandle) -> Result<bool> {
        self.calls.borrow_mut().push(Call::DeleteGroup(chat.clone()));
        Ok(true)
    }

    fn get_members(&self, chat: &ChatHandle) -> Result<Vec<ChatMember>> {
        Ok(self.members.borrow().get(chat).cloned().unwrap_or_default())
    }
}

/// Register `@<account>` handles for the first `count` generated accounts
pub fn register_contacts(db: &Database, count: usize) {
    for i in 0..count {
        let name = account(i);
        db.upsert_contact(&Contact::new(name.clone(), format!("@{}", name)))
            .unwrap();
    }
}
