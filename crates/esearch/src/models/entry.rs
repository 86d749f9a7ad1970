//! Index entries and their ordering keys

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Well-known system label IDs of the remote mailbox
pub mod labels {
    pub const INBOX: &str = "0";
    pub const ALL_DRAFTS: &str = "1";
    pub const ALL_SENT: &str = "2";
    pub const TRASH: &str = "3";
    pub const SPAM: &str = "4";
    pub const ALL_MAIL: &str = "5";
    pub const ARCHIVE: &str = "6";
    pub const SENT: &str = "7";
    pub const DRAFT: &str = "8";
    pub const STARRED: &str = "10";
}

/// System folder a message lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Inbox,
    Draft,
    Sent,
    Trash,
    Spam,
    Archive,
    AllMail,
}

impl Location {
    /// Derive the folder from a label set. Trash and spam win over everything
    /// else since a message in either is hidden from the other folders.
    pub fn from_labels<'a>(label_ids: impl IntoIterator<Item = &'a String>) -> Self {
        let labels: BTreeSet<&str> = label_ids.into_iter().map(String::as_str).collect();
        let has = |id: &str| labels.contains(id);

        if has(labels::TRASH) {
            Location::Trash
        } else if has(labels::SPAM) {
            Location::Spam
        } else if has(labels::INBOX) {
            Location::Inbox
        } else if has(labels::ARCHIVE) {
            Location::Archive
        } else if has(labels::DRAFT) || has(labels::ALL_DRAFTS) {
            Location::Draft
        } else if has(labels::SENT) || has(labels::ALL_SENT) {
            Location::Sent
        } else {
            Location::AllMail
        }
    }

    /// Integer code persisted in the index
    pub fn code(self) -> i64 {
        match self {
            Location::Inbox => 0,
            Location::Draft => 1,
            Location::Sent => 2,
            Location::Trash => 3,
            Location::Spam => 4,
            Location::AllMail => 5,
            Location::Archive => 6,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Location::Inbox,
            1 => Location::Draft,
            2 => Location::Sent,
            3 => Location::Trash,
            4 => Location::Spam,
            6 => Location::Archive,
            _ => Location::AllMail,
        }
    }
}

/// Position of an entry in descending `(time, order, id)` order.
///
/// Used as the resumption cursor of the build and as the iteration cursor of
/// the search engine. A cursor points *at* an entry; iteration from a cursor
/// yields strictly older entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexCursor {
    pub time: i64,
    pub order: i64,
    pub message_id: MessageId,
}

impl IndexCursor {
    pub fn new(time: i64, order: i64, message_id: impl Into<MessageId>) -> Self {
        Self {
            time,
            order,
            message_id: message_id.into(),
        }
    }

    /// True if `other` sorts strictly after (is older than) this cursor
    pub fn precedes(&self, other: &IndexCursor) -> bool {
        other < self
    }
}

/// One encrypted, searchable record for a single message
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub message_id: MessageId,
    /// Seconds since epoch
    pub time: i64,
    /// Disambiguates messages that arrived in the same second
    pub order: i64,
    pub label_ids: BTreeSet<String>,
    pub is_starred: bool,
    pub is_unread: bool,
    pub location: Location,
    /// False when the body could not be decrypted
    pub has_body: bool,
    pub decryption_failed: bool,
    pub encryption_iv: Vec<u8>,
    pub encrypted_content: Vec<u8>,
}

impl IndexEntry {
    pub fn cursor(&self) -> IndexCursor {
        IndexCursor::new(self.time, self.order, self.message_id.clone())
    }

    /// Bytes of ciphertext held by this entry
    pub fn content_size(&self) -> usize {
        self.encrypted_content.len()
    }
}
