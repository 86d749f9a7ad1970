//! Remote message store collaborator
//!
//! The index only consumes two calls: a paginated metadata listing ordered
//! newest first, and a per-message detail fetch returning the encrypted body.

mod api;
mod fetcher;
mod http;

pub use api::{parse_detail, parse_page};
pub use fetcher::PageFetcher;
pub use http::{ApiSession, HttpRemoteStore, status_to_error};

use std::collections::BTreeSet;
use std::time::Duration;

use crate::models::{Contact, IndexCursor, Location, MessageId, labels};

/// Message metadata as listed by the remote store
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMetadata {
    pub id: MessageId,
    pub time: i64,
    pub order: i64,
    pub label_ids: BTreeSet<String>,
    pub unread: bool,
    pub subject: String,
    pub sender: Contact,
    pub to: Vec<Contact>,
    pub cc: Vec<Contact>,
    pub bcc: Vec<Contact>,
    /// Address the message was delivered to; selects candidate keys
    pub address_id: String,
    pub num_attachments: u32,
}

impl MessageMetadata {
    pub fn is_starred(&self) -> bool {
        self.label_ids.contains(labels::STARRED)
    }

    pub fn location(&self) -> Location {
        Location::from_labels(&self.label_ids)
    }

    pub fn cursor(&self) -> IndexCursor {
        IndexCursor::new(self.time, self.order, self.id.clone())
    }
}

/// Full message with its still-encrypted body
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDetail {
    pub metadata: MessageMetadata,
    /// Armored encrypted body
    pub body: String,
    /// `text/html`, `text/plain` or `multipart/mixed` (PGP/MIME)
    pub mime_type: String,
}

/// One page of the listing plus the server's total count
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<MessageMetadata>,
    pub total: u64,
}

/// Failure to interpret a remote payload
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {message}")]
    InvalidField { field: &'static str, message: String },

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
}

/// Failure reported by the remote collaborator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unparseable response: {0}")]
    Parse(#[from] ParseError),
}

impl RemoteError {
    /// Asking again will not help: the server rejected this request itself.
    /// Timeouts, rate limits and an expired session (401) are not permanent.
    pub fn is_permanent(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => {
                (400..500).contains(status) && !matches!(status, 401 | 408 | 429)
            }
            _ => false,
        }
    }
}

/// Paginated access to the user's remote mailbox
pub trait RemoteMessageStore: Send + Sync {
    /// List messages strictly older than `before`, newest first
    fn list_messages(
        &self,
        label_id: &str,
        before: Option<&IndexCursor>,
        page_size: usize,
    ) -> Result<MessagePage, RemoteError>;

    fn get_message_detail(&self, id: &MessageId) -> Result<MessageDetail, RemoteError>;
}
