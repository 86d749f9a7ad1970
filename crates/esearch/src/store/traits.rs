//! Storage trait definitions

use crate::error::Result;
use crate::models::{BuildSession, IndexCursor, IndexEntry, MessageId};

/// Bookkeeping bytes charged per entry on top of its ciphertext
pub const ENTRY_OVERHEAD_BYTES: u64 = 128;

/// Logical size of one entry, as counted by `size_bytes`
pub fn entry_size(entry: &IndexEntry) -> u64 {
    entry.content_size() as u64 + ENTRY_OVERHEAD_BYTES
}

/// Whether an append created or replaced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    Replaced,
}

/// One batch of a descending scan
#[derive(Debug, Clone, Default)]
pub struct EntryBatch {
    pub entries: Vec<IndexEntry>,
    /// Where to continue from; `None` once the scan is exhausted
    pub next_cursor: Option<IndexCursor>,
}

/// Persistent table of encrypted index entries for one user
///
/// Entries are keyed by message ID and never mutated in place: an update is
/// a replacing append. The build metadata (the [`BuildSession`]) lives in
/// the same store so that deleting the index deletes the checkpoint with it.
pub trait IndexStore: Send + Sync {
    /// Insert or replace the entry for `entry.message_id`
    fn append(&self, entry: &IndexEntry) -> Result<AppendOutcome>;

    fn get(&self, id: &MessageId) -> Result<Option<IndexEntry>>;

    /// Returns false if there was nothing to remove
    fn remove(&self, id: &MessageId) -> Result<bool>;

    fn count(&self) -> Result<u64>;

    /// Logical size: ciphertext bytes plus per-entry overhead
    fn size_bytes(&self) -> Result<u64>;

    /// Up to `batch_size` entries strictly older than `from` (newest first
    /// when `from` is `None`), ordered by descending `(time, order, id)`
    fn iterate_descending_by_time(
        &self,
        from: Option<&IndexCursor>,
        batch_size: usize,
    ) -> Result<EntryBatch>;

    /// Cursor of the oldest entry
    fn oldest(&self) -> Result<Option<IndexCursor>>;

    /// Remove oldest entries until `size_bytes() <= max_bytes`, then
    /// compact. Returns the number of entries removed.
    fn shrink_to(&self, max_bytes: u64) -> Result<u64>;

    /// Reclaim space freed by removals
    fn compact(&self) -> Result<()>;

    /// Remove every entry and the build metadata. Either everything goes or
    /// nothing changes.
    fn delete_all(&self) -> Result<()>;

    fn load_session(&self, user_id: &str) -> Result<Option<BuildSession>>;

    fn save_session(&self, session: &BuildSession) -> Result<()>;
}
