//! Two-phase search: the recency cache first, then the encrypted index

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, warn};

use super::cache::{CacheFeed, CacheSnapshot, SearchCache};
use super::matcher::{self, FieldHighlight};
use super::query::extract_keywords;
use crate::config::IndexConfig;
use crate::crypto::Cipher;
use crate::environment::DeviceProbe;
use crate::error::{IndexError, Result};
use crate::metrics::{MetricsEvent, MetricsSink};
use crate::models::{Contact, ContentRecord, IndexCursor, IndexEntry, Location, MessageId};
use crate::store::IndexStore;

/// One matching message
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub message_id: MessageId,
    pub time: i64,
    pub is_unread: bool,
    pub is_starred: bool,
    pub location: Location,
    pub label_ids: Vec<String>,
    pub subject: String,
    pub sender: Contact,
    pub snippet: String,
    pub highlights: Vec<FieldHighlight>,
    /// Matched on metadata only; the body was never decrypted
    pub decryption_failed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// No further page can produce hits
    pub is_complete: bool,
}

/// Progress of one query. Not shared between queries.
#[derive(Debug, Clone)]
pub struct SearchState {
    keywords: Vec<String>,
    cache: CacheSnapshot,
    cache_position: usize,
    cache_exhausted: bool,
    index_cursor: Option<IndexCursor>,
    index_exhausted: bool,
    index_batches: u64,
    results_found: usize,
    seen: HashSet<MessageId>,
}

impl SearchState {
    fn empty() -> Self {
        Self {
            keywords: Vec::new(),
            cache: CacheSnapshot::default(),
            cache_position: 0,
            cache_exhausted: true,
            index_cursor: None,
            index_exhausted: true,
            index_batches: 0,
            results_found: 0,
            seen: HashSet::new(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn results_found(&self) -> usize {
        self.results_found
    }

    pub fn is_complete(&self) -> bool {
        self.cache_exhausted && self.index_exhausted
    }
}

#[derive(Debug, Clone)]
struct SearchSettings {
    page_size: usize,
    snippet_context: usize,
    cache_memory_fraction: f64,
    search_memory_fraction: f64,
    record_size_estimate: u64,
    max_batch: usize,
}

impl From<&IndexConfig> for SearchSettings {
    fn from(config: &IndexConfig) -> Self {
        Self {
            page_size: config.search_page_size.max(1),
            snippet_context: config.snippet_context_chars,
            cache_memory_fraction: config.cache_memory_fraction,
            search_memory_fraction: config.search_memory_fraction,
            record_size_estimate: config.record_size_estimate.max(1),
            max_batch: config.max_search_batch.max(1),
        }
    }
}

pub struct SearchEngine {
    store: Arc<dyn IndexStore>,
    cipher: Arc<Cipher>,
    probe: Arc<dyn DeviceProbe>,
    metrics: Arc<dyn MetricsSink>,
    cache: Mutex<SearchCache>,
    feed: CacheFeed,
    settings: SearchSettings,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn IndexStore>,
        cipher: Arc<Cipher>,
        probe: Arc<dyn DeviceProbe>,
        metrics: Arc<dyn MetricsSink>,
        config: &IndexConfig,
    ) -> Self {
        let settings = SearchSettings::from(config);
        let capacity = fraction_of(probe.available_memory(), settings.cache_memory_fraction);
        let (cache, feed) = SearchCache::new(capacity);
        Self {
            store,
            cipher,
            probe,
            metrics,
            cache: Mutex::new(cache),
            feed,
            settings,
        }
    }

    /// Feed for the index writer to keep the cache current
    pub fn cache_feed(&self) -> CacheFeed {
        self.feed.clone()
    }

    /// Start a query. An empty query touches neither the cache nor the
    /// store.
    pub fn start(&self, query: &str) -> Result<SearchState> {
        let keywords = extract_keywords(query);
        if keywords.is_empty() {
            return Ok(SearchState::empty());
        }

        let snapshot = {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| IndexError::Storage("search cache lock poisoned".into()))?;
            cache.set_capacity(fraction_of(
                self.probe.available_memory(),
                self.settings.cache_memory_fraction,
            ));
            cache.snapshot(self.store.as_ref(), &self.cipher)?
        };

        let index_exhausted = !snapshot.saturated;
        Ok(SearchState {
            keywords,
            index_cursor: snapshot.boundary.clone(),
            cache: snapshot,
            cache_position: 0,
            cache_exhausted: false,
            index_exhausted,
            index_batches: 0,
            results_found: 0,
            seen: HashSet::new(),
        })
    }

    /// Start a query and fetch its first page
    pub fn search(&self, query: &str) -> Result<(SearchState, SearchPage)> {
        let mut state = self.start(query)?;
        let page = self.next_page(&mut state)?;
        Ok((state, page))
    }

    /// Up to one page of further hits
    pub fn next_page(&self, state: &mut SearchState) -> Result<SearchPage> {
        if state.is_complete() {
            return Ok(SearchPage {
                hits: Vec::new(),
                is_complete: true,
            });
        }

        let started = Instant::now();
        let mut hits = Vec::new();

        self.cache_phase(state, &mut hits);
        let used_index = hits.len() < self.settings.page_size && !state.index_exhausted;
        if used_index {
            self.index_phase(state, &mut hits)?;
        }

        state.results_found += hits.len();
        self.metrics.record(MetricsEvent::SearchPage {
            duration: started.elapsed(),
            cache_entries: state.cache.messages.len(),
            results: hits.len(),
            used_index,
        });

        Ok(SearchPage {
            hits,
            is_complete: state.is_complete(),
        })
    }

    fn cache_phase(&self, state: &mut SearchState, hits: &mut Vec<SearchHit>) {
        while hits.len() < self.settings.page_size {
            let Some(message) = state.cache.messages.get(state.cache_position).cloned() else {
                state.cache_exhausted = true;
                return;
            };
            state.cache_position += 1;
            self.consider(state, &message.entry, &message.record, hits);
        }
        if state.cache_position >= state.cache.messages.len() {
            state.cache_exhausted = true;
        }
    }

    fn index_phase(&self, state: &mut SearchState, hits: &mut Vec<SearchHit>) -> Result<()> {
        let max_batches = self.store.count()? + 1;

        while hits.len() < self.settings.page_size && !state.index_exhausted {
            if state.index_batches >= max_batches {
                warn!("Search stopped after {} index batches", state.index_batches);
                state.index_exhausted = true;
                break;
            }

            let batch_size = self.index_batch_size();
            let batch = self
                .store
                .iterate_descending_by_time(state.index_cursor.as_ref(), batch_size)?;
            state.index_batches += 1;
            if batch.next_cursor.is_none() {
                state.index_exhausted = true;
            }
            debug!("Index search batch of {} entries", batch.entries.len());

            for entry in batch.entries {
                if hits.len() >= self.settings.page_size {
                    // The rest of this batch is read again next page
                    state.index_exhausted = false;
                    break;
                }
                state.index_cursor = Some(entry.cursor());
                match self.cipher.decrypt(&entry.encryption_iv, &entry.encrypted_content) {
                    Ok(record) => self.consider(state, &entry, &record, hits),
                    Err(e) => debug!("Skipping index entry {}: {}", entry.message_id, e),
                }
            }
        }
        Ok(())
    }

    /// Entries per index batch, from live memory telemetry
    fn index_batch_size(&self) -> usize {
        let budget = fraction_of(self.probe.available_memory(), self.settings.search_memory_fraction);
        let size = budget as u64 / self.settings.record_size_estimate;
        (size as usize).clamp(1, self.settings.max_batch)
    }

    fn consider(
        &self,
        state: &mut SearchState,
        entry: &IndexEntry,
        record: &ContentRecord,
        hits: &mut Vec<SearchHit>,
    ) {
        if state.seen.contains(&entry.message_id) {
            return;
        }
        if !matcher::matches(record, entry.has_body, &state.keywords) {
            return;
        }
        state.seen.insert(entry.message_id.clone());
        hits.push(self.make_hit(entry, record, &state.keywords));
    }

    fn make_hit(&self, entry: &IndexEntry, record: &ContentRecord, keywords: &[String]) -> SearchHit {
        let snippet = if entry.has_body {
            matcher::snippet(&record.body, keywords, self.settings.snippet_context)
        } else {
            String::new()
        };
        let highlights = [
            matcher::highlight("subject", &record.subject, keywords),
            matcher::highlight("body", &snippet, keywords),
        ]
        .into_iter()
        .flatten()
        .collect();

        SearchHit {
            message_id: entry.message_id.clone(),
            time: entry.time,
            is_unread: entry.is_unread,
            is_starred: entry.is_starred,
            location: entry.location,
            label_ids: entry.label_ids.iter().cloned().collect(),
            subject: record.subject.clone(),
            sender: record.sender.clone(),
            snippet,
            highlights,
            decryption_failed: entry.decryption_failed,
        }
    }
}

fn fraction_of(bytes: u64, fraction: f64) -> usize {
    (bytes as f64 * fraction.clamp(0.0, 1.0)) as usize
}
