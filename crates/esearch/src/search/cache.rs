//! Recency cache of decrypted index entries
//!
//! Holds the newest-first prefix of the index, down to a boundary cursor,
//! within a byte budget. The index store stays authoritative: the cache is
//! filled lazily and kept current through a change feed.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use log::{debug, warn};

use crate::crypto::Cipher;
use crate::error::Result;
use crate::models::{ContentRecord, IndexCursor, IndexEntry, MessageId};
use crate::store::{ENTRY_OVERHEAD_BYTES, IndexStore};

/// Entries read from the store per fill query
const FILL_BATCH: usize = 200;

/// A decrypted entry. The ciphertext is dropped.
#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub entry: IndexEntry,
    pub record: ContentRecord,
    size: usize,
}

impl CachedMessage {
    fn new(mut entry: IndexEntry, record: ContentRecord) -> Self {
        entry.encrypted_content = Vec::new();
        entry.encryption_iv = Vec::new();
        let size = record.approximate_size() + ENTRY_OVERHEAD_BYTES as usize;
        Self {
            entry,
            record,
            size,
        }
    }
}

/// Change notification from the index writer
#[derive(Debug, Clone)]
pub enum CacheUpdate {
    Upsert(IndexEntry),
    Remove(MessageId),
    Clear,
}

/// Sending half of the cache change feed. Sends never fail loudly: a
/// dropped cache has nothing to keep current.
#[derive(Clone)]
pub struct CacheFeed {
    sender: Sender<CacheUpdate>,
}

impl CacheFeed {
    pub fn upsert(&self, entry: &IndexEntry) {
        let _ = self.sender.send(CacheUpdate::Upsert(entry.clone()));
    }

    pub fn remove(&self, id: &MessageId) {
        let _ = self.sender.send(CacheUpdate::Remove(id.clone()));
    }

    pub fn clear(&self) {
        let _ = self.sender.send(CacheUpdate::Clear);
    }
}

/// Point-in-time view used by one search
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub messages: Vec<Arc<CachedMessage>>,
    /// Where the index phase continues; `None` means from the newest entry
    pub boundary: Option<IndexCursor>,
    /// False when the cache holds the whole index
    pub saturated: bool,
}

pub struct SearchCache {
    /// Newest first
    messages: Vec<Arc<CachedMessage>>,
    capacity_bytes: usize,
    used_bytes: usize,
    boundary: Option<IndexCursor>,
    saturated: bool,
    updates: Receiver<CacheUpdate>,
}

impl SearchCache {
    pub fn new(capacity_bytes: usize) -> (Self, CacheFeed) {
        let (sender, updates) = mpsc::channel();
        let cache = Self {
            messages: Vec::new(),
            capacity_bytes,
            used_bytes: 0,
            boundary: None,
            saturated: capacity_bytes == 0,
            updates,
        };
        (cache, CacheFeed { sender })
    }

    /// Apply pending changes, top up from the store, and hand out a view
    pub fn snapshot(&mut self, store: &dyn IndexStore, cipher: &Cipher) -> Result<CacheSnapshot> {
        self.apply_updates(cipher);
        if !self.saturated {
            self.fill(store, cipher)?;
        }
        Ok(CacheSnapshot {
            messages: self.messages.clone(),
            boundary: self.boundary.clone(),
            saturated: self.saturated,
        })
    }

    /// Change the byte budget, evicting if it shrank
    pub fn set_capacity(&mut self, capacity_bytes: usize) {
        if capacity_bytes > self.capacity_bytes {
            // There may be room for entries past the boundary now
            self.saturated = false;
        }
        self.capacity_bytes = capacity_bytes;
        self.evict_to_capacity();
    }

    fn apply_updates(&mut self, cipher: &Cipher) {
        while let Ok(update) = self.updates.try_recv() {
            match update {
                CacheUpdate::Upsert(entry) => self.upsert(entry, cipher),
                CacheUpdate::Remove(id) => self.remove(&id),
                CacheUpdate::Clear => self.clear(),
            }
        }
    }

    fn upsert(&mut self, entry: IndexEntry, cipher: &Cipher) {
        self.remove(&entry.message_id);

        // Past the boundary the fill or the index phase will find it
        let cursor = entry.cursor();
        let within = match &self.boundary {
            Some(boundary) => cursor >= *boundary,
            None => false,
        };
        if !within {
            return;
        }

        match cipher.decrypt(&entry.encryption_iv, &entry.encrypted_content) {
            Ok(record) => {
                let message = Arc::new(CachedMessage::new(entry, record));
                let at = self
                    .messages
                    .partition_point(|m| m.entry.cursor() > cursor);
                self.used_bytes += message.size;
                self.messages.insert(at, message);
                self.evict_to_capacity();
            }
            Err(e) => warn!("Skipping cache update for {}: {}", entry.message_id, e),
        }
    }

    fn remove(&mut self, id: &MessageId) {
        if let Some(pos) = self.messages.iter().position(|m| &m.entry.message_id == id) {
            let removed = self.messages.remove(pos);
            self.used_bytes -= removed.size;
        }
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.used_bytes = 0;
        self.boundary = None;
        self.saturated = self.capacity_bytes == 0;
    }

    fn fill(&mut self, store: &dyn IndexStore, cipher: &Cipher) -> Result<()> {
        let mut added = 0usize;
        loop {
            let batch = store.iterate_descending_by_time(self.boundary.as_ref(), FILL_BATCH)?;
            let exhausted = batch.next_cursor.is_none();

            for entry in batch.entries {
                let cursor = entry.cursor();
                match cipher.decrypt(&entry.encryption_iv, &entry.encrypted_content) {
                    Ok(record) => {
                        let message = CachedMessage::new(entry, record);
                        if self.used_bytes + message.size > self.capacity_bytes {
                            self.saturated = true;
                            debug!("Search cache full at {} entries", self.messages.len());
                            return Ok(());
                        }
                        self.used_bytes += message.size;
                        self.messages.push(Arc::new(message));
                        added += 1;
                    }
                    Err(e) => debug!("Not caching {}: {}", entry.message_id, e),
                }
                self.boundary = Some(cursor);
            }

            if exhausted {
                if added > 0 {
                    debug!("Search cache holds the whole index ({} entries)", self.messages.len());
                }
                return Ok(());
            }
        }
    }

    fn evict_to_capacity(&mut self) {
        while self.used_bytes > self.capacity_bytes {
            let Some(evicted) = self.messages.pop() else {
                break;
            };
            self.used_bytes -= evicted.size;
            self.saturated = true;
            self.boundary = self.messages.last().map(|m| m.entry.cursor());
        }
    }
}
