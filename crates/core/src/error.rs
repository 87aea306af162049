//! Error types for Fractal Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Malformed chain payload: {0}")]
    MalformedPayload(String),

    #[error("Inconsistent election data: {0}")]
    Inconsistent(String),

    #[error("Chain query failed: {0}")]
    Chain(String),

    #[error("Messaging failed: {0}")]
    Messaging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error must cancel the current round instead of being
    /// absorbed by a per-room or per-recipient loop
    pub fn is_round_fatal(&self) -> bool {
        matches!(
            self,
            Error::Inconsistent(_) | Error::MalformedPayload(_) | Error::InvalidArgument(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
