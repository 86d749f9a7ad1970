//! Keyword search over the encrypted index
//!
//! Queries are lowercased keywords (quoted phrases kept whole) that must all
//! occur in a message's subject, participants or body. There is no ranking:
//! hits come back newest first, one page at a time.

mod cache;
mod engine;
mod matcher;
mod query;

pub use cache::{CacheFeed, CacheSnapshot, CacheUpdate, CachedMessage, SearchCache};
pub use engine::{SearchEngine, SearchHit, SearchPage, SearchState};
pub use matcher::{FieldHighlight, HighlightSpan, highlight, matches, snippet};
pub use query::extract_keywords;
