//! Persistent storage for encrypted index entries

mod blob;
mod memory;
mod sqlite;
mod traits;

pub use blob::BlobDir;
pub use memory::InMemoryIndexStore;
pub use sqlite::SqliteIndexStore;
pub use traits::{AppendOutcome, ENTRY_OVERHEAD_BYTES, EntryBatch, IndexStore, entry_size};
