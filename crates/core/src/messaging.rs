//! Messaging collaborator
//!
//! Transport adapters implement [`Messenger`]. Retries and rate limiting
//! belong to the adapter; an `Err` here is a final failure for that call.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::ChatHandle;

/// Inline button attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub url: String,
}

/// A member of a chat as seen by the messenger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub handle: String,
    pub is_bot: bool,
}

/// Group chat and direct message operations
pub trait Messenger {
    /// Create a group chat and return its handle
    fn create_group(&self, name: &str, description: &str) -> Result<ChatHandle>;

    /// Invite accounts to a chat
    fn add_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()>;

    /// Grant admin rights in a chat
    fn promote_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()>;

    /// Remove accounts from a chat
    fn remove_members(&self, chat: &ChatHandle, handles: &[String]) -> Result<()>;

    /// Send a direct or group message; `Ok(false)` means the transport refused it
    fn send_message(&self, recipient: &str, text: &str, buttons: &[Button]) -> Result<bool>;

    /// Delete a chat
    fn delete_group(&self, chat: &ChatHandle) -> Result<bool>;

    /// Current members of a chat
    fn get_members(&self, chat: &ChatHandle) -> Result<Vec<ChatMember>>;
}
