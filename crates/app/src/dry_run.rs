//! Messenger that only logs what it would do

use std::sync::atomic::{AtomicU32, Ordering};

use fractal_core::{Button, ChatHandle, ChatMember, Messenger, Result};
use tracing::info;

/// Logs every messaging call and hands out synthetic chat handles
#[derive(Debug, Default)]
pub struct DryRunMessenger {
    next_chat: AtomicU32,
}

impl DryRunMessenger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Messenger for DryRunMessenger {
    fn create_group(&self, name: &str, description: &str) -> Result<ChatHandle> {
        let n = self.next_chat.fetch_add(1, Ordering::Relaxed) + 1;
        let chat = ChatHandle(format!("dry-run-{}", n));
        info!(%name, %description, chat = %chat.0, "create group");
        Ok(chat)
    }

    fn add_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()> {
        info!(chat = %chat.0, ?handles, "add members");
        Ok(())
    }

    fn promote_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()> {
        info!(chat = %chat.0, ?handles, "promote members");
        Ok(())
    }

    fn remove_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()> {
        info!(chat = %chat.0, ?handles, "remove members");
        Ok(())
    }

    fn send_message(&self, recipient: &str, text: &str, buttons: &[Button]) -> Result<bool> {
        info!(%recipient, buttons = buttons.len(), "send: {}", text);
        Ok(true)
    }

    fn delete_group(&self, chat: &ChatHandle) -> Result<bool> {
        info!(chat = %chat.0, "delete group");
        Ok(true)
    }

    fn get_members(&self, _chat: &ChatHandle) -> Result<Vec<ChatMember>> {
        Ok(Vec::new())
    }
}
