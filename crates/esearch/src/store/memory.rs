//! In-memory index store for tests and ephemeral sessions

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::traits::{AppendOutcome, EntryBatch, IndexStore, entry_size};
use crate::error::{IndexError, Result};
use crate::models::{BuildSession, IndexCursor, IndexEntry, MessageId};

#[derive(Default)]
struct Inner {
    entries: BTreeMap<IndexCursor, IndexEntry>,
    by_id: HashMap<MessageId, IndexCursor>,
    sessions: HashMap<String, BuildSession>,
    size_bytes: u64,
}

impl Inner {
    fn remove(&mut self, id: &MessageId) -> Option<IndexEntry> {
        let cursor = self.by_id.remove(id)?;
        let entry = self.entries.remove(&cursor)?;
        self.size_bytes -= entry_size(&entry);
        Some(entry)
    }
}

#[derive(Default)]
pub struct InMemoryIndexStore {
    inner: RwLock<Inner>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| IndexError::Storage("index lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| IndexError::Storage("index lock poisoned".into()))
    }
}

impl IndexStore for InMemoryIndexStore {
    fn append(&self, entry: &IndexEntry) -> Result<AppendOutcome> {
        let mut inner = self.write()?;
        let outcome = match inner.remove(&entry.message_id) {
            Some(_) => AppendOutcome::Replaced,
            None => AppendOutcome::Inserted,
        };
        let cursor = entry.cursor();
        inner.size_bytes += entry_size(entry);
        inner.by_id.insert(entry.message_id.clone(), cursor.clone());
        inner.entries.insert(cursor, entry.clone());
        Ok(outcome)
    }

    fn get(&self, id: &MessageId) -> Result<Option<IndexEntry>> {
        let inner = self.read()?;
        Ok(inner
            .by_id
            .get(id)
            .and_then(|cursor| inner.entries.get(cursor))
            .cloned())
    }

    fn remove(&self, id: &MessageId) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.read()?.entries.len() as u64)
    }

    fn size_bytes(&self) -> Result<u64> {
        Ok(self.read()?.size_bytes)
    }

    fn iterate_descending_by_time(
        &self,
        from: Option<&IndexCursor>,
        batch_size: usize,
    ) -> Result<EntryBatch> {
        let inner = self.read()?;
        let entries: Vec<IndexEntry> = match from {
            Some(cursor) => inner
                .entries
                .range(..cursor.clone())
                .rev()
                .take(batch_size)
                .map(|(_, e)| e.clone())
                .collect(),
            None => inner
                .entries
                .values()
                .rev()
                .take(batch_size)
                .cloned()
                .collect(),
        };

        let next_cursor = if entries.len() == batch_size {
            entries.last().map(IndexEntry::cursor)
        } else {
            None
        };
        Ok(EntryBatch {
            entries,
            next_cursor,
        })
    }

    fn oldest(&self) -> Result<Option<IndexCursor>> {
        Ok(self.read()?.entries.keys().next().cloned())
    }

    fn shrink_to(&self, max_bytes: u64) -> Result<u64> {
        let mut inner = self.write()?;
        let mut removed = 0;
        while inner.size_bytes > max_bytes {
            let Some(oldest) = inner.entries.values().next().map(|e| e.message_id.clone()) else {
                break;
            };
            inner.remove(&oldest);
            removed += 1;
        }
        Ok(removed)
    }

    fn compact(&self) -> Result<()> {
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        *self.write()? = Inner::default();
        Ok(())
    }

    fn load_session(&self, user_id: &str) -> Result<Option<BuildSession>> {
        Ok(self.read()?.sessions.get(user_id).cloned())
    }

    fn save_session(&self, session: &BuildSession) -> Result<()> {
        self.write()?
            .sessions
            .insert(session.user_id.clone(), session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;

    fn make_entry(id: &str, time: i64) -> IndexEntry {
        IndexEntry {
            message_id: MessageId::new(id),
            time,
            order: 0,
            label_ids: Default::default(),
            is_starred: false,
            is_unread: false,
            location: Location::Inbox,
            has_body: true,
            decryption_failed: false,
            encryption_iv: vec![0; 24],
            encrypted_content: vec![1; 100],
        }
    }

    #[test]
    fn test_append_is_keyed() {
        let store = InMemoryIndexStore::new();
        assert_eq!(store.append(&make_entry("m1", 100)).unwrap(), AppendOutcome::Inserted);
        assert_eq!(store.append(&make_entry("m1", 100)).unwrap(), AppendOutcome::Replaced);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.size_bytes().unwrap(), 100 + super::super::traits::ENTRY_OVERHEAD_BYTES);
    }

    #[test]
    fn test_replace_with_new_time_moves_entry() {
        let store = InMemoryIndexStore::new();
        store.append(&make_entry("m1", 100)).unwrap();
        store.append(&make_entry("m1", 500)).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.oldest().unwrap().unwrap().time, 500);
    }

    #[test]
    fn test_descending_iteration() {
        let store = InMemoryIndexStore::new();
        for (id, time) in [("a", 100), ("b", 300), ("c", 200)] {
            store.append(&make_entry(id, time)).unwrap();
        }

        let first = store.iterate_descending_by_time(None, 2).unwrap();
        let times: Vec<i64> = first.entries.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![300, 200]);

        let second = store
            .iterate_descending_by_time(first.next_cursor.as_ref(), 2)
            .unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].time, 100);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn test_shrink_removes_oldest() {
        let store = InMemoryIndexStore::new();
        for (id, time) in [("a", 100), ("b", 200), ("c", 300)] {
            store.append(&make_entry(id, time)).unwrap();
        }
        let one_entry = store.size_bytes().unwrap() / 3;

        assert_eq!(store.shrink_to(one_entry).unwrap(), 2);
        assert!(store.get(&MessageId::new("c")).unwrap().is_some());
        assert!(store.get(&MessageId::new("a")).unwrap().is_none());
    }
}
