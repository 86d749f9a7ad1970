//! SQLite-based index storage with out-of-line blobs for large entries

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::blob::{BlobDir, tombstone_path};
use super::traits::{AppendOutcome, ENTRY_OVERHEAD_BYTES, EntryBatch, IndexStore};
use crate::error::{IndexError, Result};
use crate::models::{BuildSession, IndexCursor, IndexEntry, Location, MessageId};

const DB_FILE: &str = "index.sqlite3";
const BLOB_DIR: &str = "blobs";

/// Rows removed per statement while shrinking
const SHRINK_BATCH: usize = 200;

const ENTRY_COLUMNS: &str = "message_id, time, ord, label_ids, is_starred, is_unread, location,
     has_body, decryption_failed, encryption_iv, encrypted_content, content_file";

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One row per indexed message; content is sealed with the index key
            CREATE TABLE entries (
                message_id TEXT PRIMARY KEY,
                time INTEGER NOT NULL,
                ord INTEGER NOT NULL,
                label_ids TEXT NOT NULL,
                is_starred INTEGER NOT NULL DEFAULT 0,
                is_unread INTEGER NOT NULL DEFAULT 0,
                location INTEGER NOT NULL,
                has_body INTEGER NOT NULL DEFAULT 1,
                decryption_failed INTEGER NOT NULL DEFAULT 0,
                encryption_iv BLOB NOT NULL,
                encrypted_content BLOB,  -- NULL when stored in content_file
                content_file TEXT,
                content_size INTEGER NOT NULL
            );

            CREATE INDEX idx_entries_order
                ON entries(time DESC, ord DESC, message_id DESC);

            -- Build checkpoint per user
            CREATE TABLE build_session (
                user_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        ),
        // Migration 2: Find failed decryptions without a scan
        M::up(
            r#"
            CREATE INDEX idx_entries_decryption_failed
                ON entries(decryption_failed) WHERE decryption_failed = 1;
            "#,
        ),
    ])
}

/// SQLite-based index storage for one user
///
/// Directory layout:
/// ```text
/// <root>/
///   index.sqlite3
///   blobs/          # ciphertext above the out-of-line threshold
/// ```
pub struct SqliteIndexStore {
    conn: Mutex<Connection>,
    blobs: BlobDir,
    root: PathBuf,
    out_of_line_threshold: usize,
}

impl SqliteIndexStore {
    /// Per-user index directory under `index_root`
    pub fn user_dir(index_root: &Path, user_id: &str) -> PathBuf {
        index_root.join(format!("encryptedSearchIndex_{}", urlencoding::encode(user_id)))
    }

    /// Open or create the index at `root`
    ///
    /// Fails with [`IndexError::IndexCorrupt`] if the database cannot be
    /// opened, migrated, or fails its integrity check. The caller decides
    /// whether to [`SqliteIndexStore::destroy`] and rebuild.
    pub fn open(root: impl AsRef<Path>, out_of_line_threshold: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        sweep_tombstone(&root);
        fs::create_dir_all(&root)?;

        let db_path = root.join(DB_FILE);
        let mut conn = Connection::open(&db_path)
            .map_err(|e| IndexError::IndexCorrupt(format!("open {db_path:?}: {e}")))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| IndexError::IndexCorrupt(format!("configure {db_path:?}: {e}")))?;

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| IndexError::IndexCorrupt(format!("integrity check: {e}")))?;
        if check != "ok" {
            return Err(IndexError::IndexCorrupt(check));
        }

        migrations()
            .to_latest(&mut conn)
            .map_err(|e| IndexError::IndexCorrupt(format!("migrations: {e}")))?;

        let blobs = BlobDir::new(root.join(BLOB_DIR))?;
        blobs.sweep();

        debug!("Opened search index at {:?}", root);
        Ok(Self {
            conn: Mutex::new(conn),
            blobs,
            root,
            out_of_line_threshold,
        })
    }

    /// Remove an index directory. Renames first so a crash mid-removal never
    /// leaves a half-deleted index that looks usable.
    pub fn destroy(root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        if root.exists() {
            let tombstone = tombstone_path(root);
            if tombstone.exists() {
                fs::remove_dir_all(&tombstone)?;
            }
            fs::rename(root, &tombstone)?;
            fs::remove_dir_all(&tombstone)?;
            info!("Destroyed search index at {:?}", root);
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes on disk: database pages plus blob files
    pub fn disk_usage(&self) -> Result<u64> {
        let (page_count, page_size): (i64, i64) = {
            let conn = self.conn()?;
            (
                conn.query_row("PRAGMA page_count", [], |row| row.get(0))?,
                conn.query_row("PRAGMA page_size", [], |row| row.get(0))?,
            )
        };
        Ok((page_count * page_size).max(0) as u64 + self.blobs.total_bytes()?)
    }

    /// IDs of entries whose body could not be decrypted
    pub fn failed_decryptions(&self) -> Result<Vec<MessageId>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT message_id FROM entries WHERE decryption_failed = 1")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(MessageId::new).collect())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IndexError::Storage("index connection lock poisoned".into()))
    }

    /// Finish an entry read with [`read_row`]: parse labels and load
    /// out-of-line content. Either failing means the index is damaged.
    fn finish_entry(&self, row: StoredRow) -> Result<IndexEntry> {
        let StoredRow {
            mut entry,
            label_json,
            inline,
            content_file,
        } = row;
        let id = &entry.message_id;

        entry.label_ids = serde_json::from_str(&label_json)
            .map_err(|e| IndexError::IndexCorrupt(format!("labels of entry {id}: {e}")))?;
        entry.encrypted_content = match (inline, content_file) {
            (Some(bytes), _) => bytes,
            (None, Some(file)) => self.blobs.get(&file)?.ok_or_else(|| {
                IndexError::IndexCorrupt(format!("content file {file} missing for entry {id}"))
            })?,
            (None, None) => {
                return Err(IndexError::IndexCorrupt(format!(
                    "no content stored for entry {id}"
                )));
            }
        };
        Ok(entry)
    }

    fn write_entry(&self, entry: &IndexEntry) -> Result<AppendOutcome> {
        let id = entry.message_id.as_str();
        let label_json = serde_json::to_string(&entry.label_ids)?;

        // New content goes to a file of its own; the row is switched over
        // only once that file is complete
        let mut written = None;
        let (inline, content_file) = if entry.encrypted_content.len() > self.out_of_line_threshold
        {
            let file = BlobDir::file_name(id, &entry.encryption_iv);
            if !self.blobs.contains(&file) {
                self.blobs.put(&file, &entry.encrypted_content)?;
                written = Some(file.clone());
            }
            (None, Some(file))
        } else {
            (Some(entry.encrypted_content.as_slice()), None)
        };

        let previous_file = match self.upsert_row(entry, &label_json, inline, content_file.as_deref()) {
            Ok(previous_file) => previous_file,
            Err(e) => {
                if let Some(file) = &written {
                    if let Err(cleanup) = self.blobs.delete(file) {
                        warn!("Failed to remove orphaned content file {file}: {cleanup}");
                    }
                }
                return Err(e);
            }
        };

        // The row is committed; a stale file is only wasted space
        if let Some(Some(old_file)) = &previous_file {
            if content_file.as_ref() != Some(old_file) {
                if let Err(e) = self.blobs.delete(old_file) {
                    warn!("Failed to remove replaced content file {old_file}: {e}");
                }
            }
        }

        Ok(if previous_file.is_some() {
            AppendOutcome::Replaced
        } else {
            AppendOutcome::Inserted
        })
    }

    /// Insert or replace the row for `entry`. Returns the content file of
    /// the row it replaced, if there was one.
    fn upsert_row(
        &self,
        entry: &IndexEntry,
        label_json: &str,
        inline: Option<&[u8]>,
        content_file: Option<&str>,
    ) -> Result<Option<Option<String>>> {
        let id = entry.message_id.as_str();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let previous_file: Option<Option<String>> = tx
            .query_row(
                "SELECT content_file FROM entries WHERE message_id = ?",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO entries
             (message_id, time, ord, label_ids, is_starred, is_unread, location,
              has_body, decryption_failed, encryption_iv, encrypted_content,
              content_file, content_size)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(message_id) DO UPDATE SET
                time = excluded.time,
                ord = excluded.ord,
                label_ids = excluded.label_ids,
                is_starred = excluded.is_starred,
                is_unread = excluded.is_unread,
                location = excluded.location,
                has_body = excluded.has_body,
                decryption_failed = excluded.decryption_failed,
                encryption_iv = excluded.encryption_iv,
                encrypted_content = excluded.encrypted_content,
                content_file = excluded.content_file,
                content_size = excluded.content_size",
            params![
                id,
                entry.time,
                entry.order,
                label_json,
                entry.is_starred,
                entry.is_unread,
                entry.location.code(),
                entry.has_body,
                entry.decryption_failed,
                entry.encryption_iv,
                inline,
                content_file,
                entry.content_size() as i64,
            ],
        )?;
        tx.commit()?;
        Ok(previous_file)
    }
}

/// An entry row before its labels are parsed and its content is loaded
struct StoredRow {
    entry: IndexEntry,
    label_json: String,
    inline: Option<Vec<u8>>,
    content_file: Option<String>,
}

/// Map a row selected with [`ENTRY_COLUMNS`]
fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        entry: IndexEntry {
            message_id: MessageId::new(row.get::<_, String>(0)?),
            time: row.get(1)?,
            order: row.get(2)?,
            label_ids: Default::default(),
            is_starred: row.get(4)?,
            is_unread: row.get(5)?,
            location: Location::from_code(row.get(6)?),
            has_body: row.get(7)?,
            decryption_failed: row.get(8)?,
            encryption_iv: row.get(9)?,
            encrypted_content: Vec::new(),
        },
        label_json: row.get(3)?,
        inline: row.get(10)?,
        content_file: row.get(11)?,
    })
}

impl IndexStore for SqliteIndexStore {
    fn append(&self, entry: &IndexEntry) -> Result<AppendOutcome> {
        self.write_entry(entry)
            .map_err(|e| IndexError::StoreWriteFailed {
                message_id: entry.message_id.clone(),
                message: e.to_string(),
            })
    }

    fn get(&self, id: &MessageId) -> Result<Option<IndexEntry>> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE message_id = ?"),
                [id.as_str()],
                read_row,
            )
            .optional()?
        };
        row.map(|row| self.finish_entry(row)).transpose()
    }

    fn remove(&self, id: &MessageId) -> Result<bool> {
        let content_file: Option<Option<String>> = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let file = tx
                .query_row(
                    "SELECT content_file FROM entries WHERE message_id = ?",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute("DELETE FROM entries WHERE message_id = ?", [id.as_str()])?;
            tx.commit()?;
            file
        };

        match content_file {
            None => Ok(false),
            Some(file) => {
                if let Some(file) = file {
                    self.blobs.delete(&file)?;
                }
                Ok(true)
            }
        }
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn size_bytes(&self) -> Result<u64> {
        let conn = self.conn()?;
        let size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(content_size + ?), 0) FROM entries",
            [ENTRY_OVERHEAD_BYTES as i64],
            |row| row.get(0),
        )?;
        Ok(size.max(0) as u64)
    }

    fn iterate_descending_by_time(
        &self,
        from: Option<&IndexCursor>,
        batch_size: usize,
    ) -> Result<EntryBatch> {
        let limit = batch_size as i64;
        let rows = {
            let conn = self.conn()?;
            match from {
                Some(cursor) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries
                         WHERE (time, ord, message_id) < (?, ?, ?)
                         ORDER BY time DESC, ord DESC, message_id DESC
                         LIMIT ?"
                    ))?;
                    stmt.query_map(
                        params![cursor.time, cursor.order, cursor.message_id.as_str(), limit],
                        read_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries
                         ORDER BY time DESC, ord DESC, message_id DESC
                         LIMIT ?"
                    ))?;
                    stmt.query_map([limit], read_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            }
        };
        let entries = rows
            .into_iter()
            .map(|row| self.finish_entry(row))
            .collect::<Result<Vec<_>>>()?;

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
        let conn = self.conn()?;
        let cursor = conn
            .query_row(
                "SELECT time, ord, message_id FROM entries
                 ORDER BY time ASC, ord ASC, message_id ASC LIMIT 1",
                [],
                |row| {
                    Ok(IndexCursor::new(
                        row.get(0)?,
                        row.get(1)?,
                        MessageId::new(row.get::<_, String>(2)?),
                    ))
                },
            )
            .optional()?;
        Ok(cursor)
    }

    fn shrink_to(&self, max_bytes: u64) -> Result<u64> {
        let mut removed = 0u64;
        let mut size = self.size_bytes()?;

        while size > max_bytes {
            let victims: Vec<(String, Option<String>, i64)> = {
                let conn = self.conn()?;
                let mut stmt = conn.prepare(
                    "SELECT message_id, content_file, content_size FROM entries
                     ORDER BY time ASC, ord ASC, message_id ASC LIMIT ?",
                )?;
                stmt.query_map([SHRINK_BATCH as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };
            if victims.is_empty() {
                break;
            }

            // Only as many as needed to get under the limit
            let mut doomed = Vec::new();
            for (id, file, content_size) in victims {
                if size <= max_bytes {
                    break;
                }
                size = size.saturating_sub(content_size.max(0) as u64 + ENTRY_OVERHEAD_BYTES);
                doomed.push((id, file));
            }

            {
                let mut conn = self.conn()?;
                let tx = conn.transaction()?;
                for (id, _) in &doomed {
                    tx.execute("DELETE FROM entries WHERE message_id = ?", [id])?;
                }
                tx.commit()?;
            }
            for (_, file) in &doomed {
                if let Some(file) = file {
                    self.blobs.delete(file)?;
                }
            }
            removed += doomed.len() as u64;
        }

        if removed > 0 {
            info!("Shrank search index by {} entries", removed);
            self.compact()?;
        }
        Ok(removed)
    }

    fn compact(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); VACUUM;")?;
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entries", [])?;
            tx.execute("DELETE FROM build_session", [])?;
            tx.commit()?;
        }
        // Nothing references the files or free pages any more
        if let Err(e) = self.blobs.clear() {
            warn!("Failed to clear content files: {}", e);
        }
        if let Err(e) = self.compact() {
            warn!("Failed to compact emptied index: {}", e);
        }
        Ok(())
    }

    fn load_session(&self, user_id: &str) -> Result<Option<BuildSession>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM build_session WHERE user_id = ?",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_session(&self, session: &BuildSession) -> Result<()> {
        let data = serde_json::to_string(session)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO build_session (user_id, data, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![session.user_id, data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn sweep_tombstone(root: &Path) {
    let tombstone = tombstone_path(root);
    if tombstone.exists() {
        if let Err(e) = fs::remove_dir_all(&tombstone) {
            warn!("Failed to remove index tombstone {:?}: {}", tombstone, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteIndexStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteIndexStore::open(dir.path().join("index.test"), 256).unwrap();
        (store, dir)
    }

    fn make_entry(id: &str, time: i64, content_len: usize) -> IndexEntry {
        IndexEntry {
            message_id: MessageId::new(id),
            time,
            order: 1,
            label_ids: ["0".to_string(), "5".to_string()].into_iter().collect(),
            is_starred: false,
            is_unread: true,
            location: Location::Inbox,
            has_body: true,
            decryption_failed: false,
            encryption_iv: vec![7; 24],
            encrypted_content: vec![42; content_len],
        }
    }

    #[test]
    fn test_entry_crud() {
        let (store, _dir) = create_test_store();
        let entry = make_entry("m1", 100, 64);

        assert_eq!(store.append(&entry).unwrap(), AppendOutcome::Inserted);
        assert_eq!(store.get(&MessageId::new("m1")).unwrap().unwrap(), entry);
        assert_eq!(store.count().unwrap(), 1);

        assert!(store.remove(&MessageId::new("m1")).unwrap());
        assert!(!store.remove(&MessageId::new("m1")).unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_append_replaces_by_id() {
        let (store, _dir) = create_test_store();
        store.append(&make_entry("m1", 100, 64)).unwrap();

        let mut updated = make_entry("m1", 100, 64);
        updated.is_unread = false;
        updated.location = Location::Archive;
        assert_eq!(store.append(&updated).unwrap(), AppendOutcome::Replaced);

        let stored = store.get(&MessageId::new("m1")).unwrap().unwrap();
        assert!(!stored.is_unread);
        assert_eq!(stored.location, Location::Archive);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_large_entries_go_out_of_line() {
        let (store, dir) = create_test_store();
        let big = make_entry("big/id==", 100, 4096);
        store.append(&big).unwrap();

        assert_eq!(store.get(&big.message_id).unwrap().unwrap(), big);
        assert!(store.disk_usage().unwrap() >= 4096);

        // Shrinking back inline drops the file
        store.append(&make_entry("big/id==", 100, 16)).unwrap();
        let blobs = BlobDir::new(dir.path().join("index.test").join(BLOB_DIR)).unwrap();
        assert_eq!(blobs.total_bytes().unwrap(), 0);
    }

    #[test]
    fn test_descending_iteration_with_ties() {
        let (store, _dir) = create_test_store();
        for (id, time) in [("a", 100), ("b", 200), ("c", 200), ("d", 300)] {
            store.append(&make_entry(id, time, 8)).unwrap();
        }

        let first = store.iterate_descending_by_time(None, 3).unwrap();
        let ids: Vec<&str> = first.entries.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "b"]);

        let rest = store
            .iterate_descending_by_time(first.next_cursor.as_ref(), 3)
            .unwrap();
        let ids: Vec<&str> = rest.entries.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(rest.next_cursor.is_none());

        assert_eq!(store.oldest().unwrap().unwrap().message_id.as_str(), "a");
    }

    #[test]
    fn test_shrink_to_removes_oldest_first() {
        let (store, _dir) = create_test_store();
        for (id, time) in [("a", 100), ("b", 200), ("c", 300), ("d", 400)] {
            store.append(&make_entry(id, time, 100)).unwrap();
        }
        let per_entry = 100 + ENTRY_OVERHEAD_BYTES;

        let removed = store.shrink_to(per_entry * 2).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.size_bytes().unwrap(), per_entry * 2);
        assert!(store.get(&MessageId::new("a")).unwrap().is_none());
        assert!(store.get(&MessageId::new("d")).unwrap().is_some());
    }

    #[test]
    fn test_session_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("index.test");
        {
            let store = SqliteIndexStore::open(&root, 256).unwrap();
            let mut session = BuildSession::new("user-1");
            session.total_messages = 3;
            session.record_processed(IndexCursor::new(300, 1, "m3"));
            store.save_session(&session).unwrap();
        }

        let store = SqliteIndexStore::open(&root, 256).unwrap();
        let session = store.load_session("user-1").unwrap().unwrap();
        assert_eq!(session.processed_messages, 1);
        assert_eq!(session.last_indexed_time(), Some(300));
        assert!(store.load_session("someone-else").unwrap().is_none());
    }

    #[test]
    fn test_delete_all_clears_entries_and_session() {
        let (store, _dir) = create_test_store();
        store.append(&make_entry("m1", 100, 4096)).unwrap();
        store.save_session(&BuildSession::new("user-1")).unwrap();

        store.delete_all().unwrap();

        assert_eq!(store.count().unwrap(), 0);
        assert!(store.load_session("user-1").unwrap().is_none());
    }

    #[test]
    fn test_failed_decryptions_listed() {
        let (store, _dir) = create_test_store();
        let mut failed = make_entry("m1", 100, 8);
        failed.decryption_failed = true;
        failed.has_body = false;
        store.append(&failed).unwrap();
        store.append(&make_entry("m2", 200, 8)).unwrap();

        assert_eq!(store.failed_decryptions().unwrap(), vec![MessageId::new("m1")]);
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("index.test");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(DB_FILE), vec![0xAB; 8192]).unwrap();

        let result = SqliteIndexStore::open(&root, 256);
        assert!(matches!(result, Err(IndexError::IndexCorrupt(_))));
    }

    #[test]
    fn test_destroy_removes_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("index.test");
        {
            let store = SqliteIndexStore::open(&root, 256).unwrap();
            store.append(&make_entry("m1", 100, 8)).unwrap();
        }

        SqliteIndexStore::destroy(&root).unwrap();
        assert!(!root.exists());
        assert!(!tombstone_path(&root).exists());
    }

    #[test]
    fn test_failed_rewrite_keeps_committed_content() {
        let (store, dir) = create_test_store();
        let original = make_entry("m1", 100, 4096);
        store.append(&original).unwrap();
        store
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_updates BEFORE UPDATE ON entries
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )
            .unwrap();

        let mut rewritten = make_entry("m1", 100, 4096);
        rewritten.encryption_iv = vec![9; 24];
        rewritten.encrypted_content = vec![43; 4096];
        let result = store.append(&rewritten);
        assert!(matches!(result, Err(IndexError::StoreWriteFailed { .. })));

        // Old IV still paired with old ciphertext, no orphaned file
        assert_eq!(store.get(&MessageId::new("m1")).unwrap().unwrap(), original);
        let blobs = BlobDir::new(dir.path().join("index.test").join(BLOB_DIR)).unwrap();
        assert_eq!(blobs.total_bytes().unwrap(), 4096);

        store
            .conn()
            .unwrap()
            .execute_batch("DROP TRIGGER reject_updates;")
            .unwrap();
        assert_eq!(store.append(&rewritten).unwrap(), AppendOutcome::Replaced);
        assert_eq!(store.get(&MessageId::new("m1")).unwrap().unwrap(), rewritten);
        assert_eq!(blobs.total_bytes().unwrap(), 4096);
    }

    #[test]
    fn test_missing_content_file_is_corrupt() {
        let (store, dir) = create_test_store();
        let big = make_entry("m1", 100, 4096);
        store.append(&big).unwrap();

        let blobs = BlobDir::new(dir.path().join("index.test").join(BLOB_DIR)).unwrap();
        blobs
            .delete(&BlobDir::file_name("m1", &big.encryption_iv))
            .unwrap();

        let result = store.get(&big.message_id);
        assert!(matches!(result, Err(IndexError::IndexCorrupt(_))));
    }

    #[test]
    fn test_unreadable_labels_are_corrupt() {
        let (store, _dir) = create_test_store();
        store.append(&make_entry("m1", 100, 8)).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE entries SET label_ids = 'not json'", [])
            .unwrap();

        let result = store.iterate_descending_by_time(None, 10);
        assert!(matches!(result, Err(IndexError::IndexCorrupt(_))));
    }

    #[test]
    fn test_destroy_dotted_user_directory() {
        let dir = tempdir().unwrap();
        let alice = SqliteIndexStore::user_dir(dir.path(), "alice@example.com");
        let other = SqliteIndexStore::user_dir(dir.path(), "alice@example.org");
        for root in [&alice, &other] {
            let store = SqliteIndexStore::open(root, 256).unwrap();
            store.append(&make_entry("m1", 100, 8)).unwrap();
        }
        // Leftover from an interrupted removal of the other user's index
        fs::create_dir_all(tombstone_path(&other)).unwrap();

        SqliteIndexStore::destroy(&alice).unwrap();

        assert!(!alice.exists());
        assert!(!tombstone_path(&alice).exists());
        assert!(tombstone_path(&other).exists());
        let store = SqliteIndexStore::open(&other, 256).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
