//! Error taxonomy for index building and search

use std::time::Duration;

use crate::models::MessageId;
use crate::remote::RemoteError;

/// Errors surfaced by the index pipeline and the search engine
///
/// Per-message variants (`AuthenticationFailed`, `DecryptionFailed`,
/// `StoreWriteFailed`) are absorbed by the build loop; the rest reach the
/// caller of the operation that hit them.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The platform secret store could not be read or written
    #[error("index key unavailable: {0}")]
    KeyUnavailable(String),

    /// AEAD tag mismatch: tampered ciphertext or wrong key
    #[error("index entry failed authentication (wrong key or tampered data)")]
    AuthenticationFailed,

    #[error("message {0} could not be decrypted with any candidate key")]
    DecryptionFailed(MessageId),

    #[error("fetch failed: {0}")]
    FetchFailed(#[source] RemoteError),

    #[error("rate limited after {attempts} attempts (last retry-after {retry_after:?})")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    #[error("failed to write index entry {message_id}: {message}")]
    StoreWriteFailed {
        message_id: MessageId,
        message: String,
    },

    /// The store could not be opened or failed its integrity check
    #[error("search index unusable: {0}")]
    IndexCorrupt(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("malformed content record: {0}")]
    Serialization(String),

    #[error("index builder is not running")]
    Stopped,
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
