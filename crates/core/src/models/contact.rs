//! Contact directory model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messenger handle registered for a chain account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub account: String,
    pub handle: String,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(account: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            handle: handle.into(),
            updated_at: Utc::now(),
        }
    }
}
