//! Contact directory storage operations

use std::collections::HashMap;

use rusqlite::{params, Connection};
use tracing::instrument;

use super::parse::{parse_datetime, OptionalExt};
use crate::error::Result;
use crate::models::Contact;

pub struct ContactStore<'a> {
    conn: &'a Connection,
}

impl<'a> ContactStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Register or replace the handle of an account
    #[instrument(skip(self, contact), fields(account = %contact.account))]
    pub fn upsert(&self, contact: &Contact) -> Result<()> {
        self.conn.execute(
            "INSERT INTO contacts (account, handle, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(account) DO UPDATE SET handle = excluded.handle, updated_at = excluded.updated_at",
            params![contact.account, contact.handle, contact.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find(&self, account: &str) -> Result<Option<Contact>> {
        let contact = self
            .conn
            .query_row(
                "SELECT account, handle, updated_at FROM contacts WHERE account = ?1",
                params![account],
                |row| {
                    Ok(Contact {
                        account: row.get(0)?,
                        handle: row.get(1)?,
                        updated_at: parse_datetime(&row.get::<_, String>(2)?)?,
                    })
                },
            )
            .optional()?;
        Ok(contact)
    }

    /// Handles of the given accounts; accounts without a contact are absent
    #[instrument(skip(self, accounts), fields(count = accounts.len()))]
    pub fn find_many(&self, accounts: &[String]) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT handle FROM contacts WHERE account = ?1")?;
        let mut handles = HashMap::new();
        for account in accounts {
            let handle: Option<String> = stmt
                .query_row(params![account], |row| row.get(0))
                .optional()?;
            if let Some(handle) = handle {
                handles.insert(account.clone(), handle);
            }
        }
        Ok(handles)
    }
}
