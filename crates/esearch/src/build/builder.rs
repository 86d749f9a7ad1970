//! The index build state machine
//!
//! [`IndexBuilder`] owns the [`BuildSession`] and advances the build one
//! page per [`IndexBuilder::step`]. It is driven by the coordinator thread;
//! nothing else mutates the session.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, error, info, warn};
use rayon::prelude::*;

use super::timing::interval_elapsed;
use crate::config::IndexConfig;
use crate::crypto::Cipher;
use crate::environment::{AppState, EnvironmentMonitor, Observation};
use crate::error::{IndexError, Result};
use crate::metrics::{MetricsEvent, MetricsSink};
use crate::models::{
    BuildPhase, BuildSession, ContentRecord, IndexEntry, IndexState, IndexStatus, Location, MessageId,
    PauseReason, labels,
};
use crate::remote::{MessageDetail, MessageMetadata, PageFetcher};
use crate::search::CacheFeed;
use crate::store::{AppendOutcome, IndexStore};
use crate::transform::ContentTransformer;

/// New label and read state for an indexed message
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub id: MessageId,
    pub label_ids: BTreeSet<String>,
    pub unread: bool,
}

/// Single-message change reported by the mailbox while the index exists
#[derive(Debug, Clone, PartialEq)]
pub enum MailboxEvent {
    Insert(MessageDetail),
    UpdateMetadata(MetadataUpdate),
    Delete(MessageId),
}

/// What one [`IndexBuilder::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to do until a command arrives
    Idle,
    /// Work was done and more remains
    Progressed,
    /// The build reached `complete` (or `partial`) in this step
    Completed,
    /// The build is paused
    Paused,
}

/// Collaborators of the builder
pub struct BuilderParts {
    pub store: Arc<dyn IndexStore>,
    pub fetcher: PageFetcher,
    pub transformer: Arc<ContentTransformer>,
    pub cipher: Arc<Cipher>,
    pub metrics: Arc<dyn MetricsSink>,
    pub feed: Option<CacheFeed>,
}

pub struct IndexBuilder {
    config: IndexConfig,
    session: BuildSession,
    store: Arc<dyn IndexStore>,
    fetcher: PageFetcher,
    transformer: Arc<ContentTransformer>,
    cipher: Arc<Cipher>,
    metrics: Arc<dyn MetricsSink>,
    feed: Option<CacheFeed>,
    environment: EnvironmentMonitor,
    pool: rayon::ThreadPool,
    pool_in_background: bool,
    pending_events: VecDeque<MailboxEvent>,
    write_failures: u32,
    /// Start rules still have to run for the current build
    start_pending: bool,
    /// Resuming an existing, incomplete index
    refreshing: bool,
    run_started: Option<Instant>,
}

impl IndexBuilder {
    /// Restore the build for `user_id` from the store's persisted session
    pub fn new(user_id: &str, config: IndexConfig, parts: BuilderParts) -> Result<Self> {
        let mut session = parts
            .store
            .load_session(user_id)?
            .unwrap_or_else(|| BuildSession::new(user_id));

        // Environment flags are re-observed after a restart
        session.pause_flags.clear_environment();
        let start_pending = matches!(session.phase, BuildPhase::Downloading | BuildPhase::Paused);
        if session.phase == BuildPhase::Paused && session.pause_flags.is_clear() {
            session.phase = BuildPhase::Downloading;
        }
        if start_pending {
            info!("Resuming index build for {} ({:?})", user_id, session.phase);
        }

        let pool = build_pool(config.foreground_workers)?;
        Ok(Self {
            environment: EnvironmentMonitor::new(&config),
            config,
            session,
            store: parts.store,
            fetcher: parts.fetcher,
            transformer: parts.transformer,
            cipher: parts.cipher,
            metrics: parts.metrics,
            feed: parts.feed,
            pool,
            pool_in_background: false,
            pending_events: VecDeque::new(),
            write_failures: 0,
            start_pending,
            refreshing: false,
            run_started: None,
        })
    }

    pub fn session(&self) -> &BuildSession {
        &self.session
    }

    pub fn phase(&self) -> BuildPhase {
        self.session.phase
    }

    pub fn pending_events(&self) -> usize {
        self.pending_events.len()
    }

    pub fn is_building(&self) -> bool {
        matches!(self.session.phase, BuildPhase::Downloading | BuildPhase::Paused)
    }

    /// Paused only because the remote store failed
    pub fn waiting_for_remote(&self) -> bool {
        self.session.phase == BuildPhase::Paused
            && self.session.pause_flags.reasons() == vec![PauseReason::RemoteUnavailable]
    }

    pub fn status(&self) -> IndexStatus {
        let phase = self.session.phase;
        let refreshing = self.refreshing
            || (matches!(phase, BuildPhase::Complete | BuildPhase::Partial)
                && !self.pending_events.is_empty());
        let state = if phase == BuildPhase::Partial && refreshing {
            IndexState::Refresh
        } else {
            IndexState::derive(
                phase,
                &self.session.pause_flags,
                self.environment.in_background(),
                refreshing,
            )
        };
        IndexStatus {
            state,
            processed_messages: self.session.processed_messages,
            total_messages: self.session.total_messages,
            pause_reasons: self.session.pause_flags.reasons(),
            estimated_remaining: if phase == BuildPhase::Downloading {
                self.session.estimate_remaining(Utc::now())
            } else {
                None
            },
            write_failures: self.write_failures,
        }
    }

    /// Turn indexing on. No effect once enabled.
    pub fn enable(&mut self) -> Result<()> {
        if self.session.phase != BuildPhase::Disabled {
            debug!("Index already enabled ({:?})", self.session.phase);
            return Ok(());
        }
        info!("Enabling encrypted search for {}", self.session.user_id);
        self.session
            .pause_flags
            .replace_environment(self.environment.flags());
        self.start_pending = true;
        self.session.phase = if self.session.pause_flags.is_clear() {
            BuildPhase::Downloading
        } else {
            BuildPhase::Paused
        };
        self.session.begin_run(Utc::now());
        self.run_started = Some(Instant::now());
        self.save_session()
    }

    /// Explicit user pause; only [`IndexBuilder::resume`] lifts it
    pub fn pause_by_user(&mut self) -> Result<()> {
        if !self.is_building() {
            return Ok(());
        }
        if self.session.pause_flags.set(PauseReason::User, true) {
            self.session.user_pauses += 1;
            info!("Index build paused by user");
        }
        self.session.phase = BuildPhase::Paused;
        self.save_session()
    }

    /// Clear explicit pauses and continue if nothing else holds the build
    pub fn resume(&mut self) -> Result<()> {
        let flags = &mut self.session.pause_flags;
        flags.set(PauseReason::User, false);
        flags.set(PauseReason::StoreFailure, false);
        flags.set(PauseReason::RemoteUnavailable, false);
        self.write_failures = 0;
        self.reevaluate_pause();
        self.save_session()
    }

    /// Fold an environment observation into the pause flags
    pub fn observe(&mut self, observation: Observation) -> Result<()> {
        if let Observation::AppState(state) = observation {
            self.adjust_pool(state)?;
        }
        if !self.environment.observe(observation) {
            return Ok(());
        }
        self.session
            .pause_flags
            .replace_environment(self.environment.flags());
        self.reevaluate_pause();
        if self.is_building() {
            self.save_session()?;
        }
        Ok(())
    }

    /// Retry after a remote failure
    pub fn clear_remote_failure(&mut self) -> Result<()> {
        if self
            .session
            .pause_flags
            .set(PauseReason::RemoteUnavailable, false)
        {
            debug!("Retrying remote store");
            self.reevaluate_pause();
            self.save_session()?;
        }
        Ok(())
    }

    /// Queue or apply a mailbox change, depending on the build state
    pub fn apply_event(&mut self, event: MailboxEvent) -> Result<()> {
        match self.session.phase {
            BuildPhase::Disabled => {
                debug!("Dropping mailbox event while disabled");
                Ok(())
            }
            BuildPhase::Downloading | BuildPhase::Paused => {
                self.pending_events.push_back(event);
                Ok(())
            }
            BuildPhase::Complete | BuildPhase::Partial => {
                if self.pending_events.is_empty() {
                    self.apply_one(event)
                } else {
                    self.pending_events.push_back(event);
                    Ok(())
                }
            }
        }
    }

    /// Change the storage limit, shrinking or resuming as needed
    pub fn set_storage_limit(&mut self, limit: Option<u64>) -> Result<()> {
        self.config.storage_limit_bytes = limit;
        if self.session.phase == BuildPhase::Disabled {
            return Ok(());
        }
        if self.enforce_storage_limit()? {
            return self.save_session();
        }

        if self.session.phase == BuildPhase::Partial
            && self.store.count()? < self.session.total_messages
        {
            info!("Storage limit raised, continuing build");
            self.session.processed_messages = self.store.count()?;
            self.session.last_indexed = self.store.oldest()?;
            self.session.phase = BuildPhase::Downloading;
            self.session.begin_run(Utc::now());
            self.reevaluate_pause();
            self.save_session()?;
        }
        Ok(())
    }

    /// Remove the index and every counter. Environment flags survive.
    pub fn delete(&mut self) -> Result<()> {
        info!("Deleting search index for {}", self.session.user_id);
        if let Err(e) = self.store.delete_all() {
            // Entries that are gone must not be reported as indexed
            if self.store.count().ok() != Some(0) {
                return Err(e);
            }
            warn!("Index deleted but cleanup failed: {}", e);
        }
        if let Some(feed) = &self.feed {
            feed.clear();
        }
        self.transformer.clear_key_cache();
        self.session.reset();
        self.session
            .pause_flags
            .replace_environment(self.environment.flags());
        self.pending_events.clear();
        self.write_failures = 0;
        self.start_pending = false;
        self.refreshing = false;
        self.run_started = None;
        Ok(())
    }

    /// Advance the build by at most one page or one queued event
    pub fn step(&mut self) -> Result<StepOutcome> {
        match self.session.phase {
            BuildPhase::Disabled => Ok(StepOutcome::Idle),
            BuildPhase::Paused => Ok(StepOutcome::Paused),
            BuildPhase::Complete | BuildPhase::Partial => self.replay_next_event(),
            BuildPhase::Downloading => {
                if !self.session.pause_flags.is_clear() {
                    self.session.phase = BuildPhase::Paused;
                    self.save_session()?;
                    return Ok(StepOutcome::Paused);
                }
                if self.start_pending {
                    if let Some(outcome) = self.begin_build()? {
                        return Ok(outcome);
                    }
                }
                self.index_next_page()
            }
        }
    }

    /// Apply the start rules against the server total and the store
    fn begin_build(&mut self) -> Result<Option<StepOutcome>> {
        let total = match self.fetcher.fetch_total(&self.config.label_id) {
            Ok(total) => total,
            Err(e) => return self.pause_for_remote(e).map(Some),
        };
        self.session.total_messages = total;
        self.session.last_total_refresh = Some(Utc::now());
        self.start_pending = false;

        let entries = self.store.count()?;
        if total == 0 {
            info!("Mailbox is empty, nothing to index");
            return self.complete().map(Some);
        }
        if entries == 0 {
            self.session.processed_messages = 0;
            self.session.last_indexed = None;
            self.refreshing = false;
        } else if entries >= total {
            self.session.processed_messages = entries;
            return self.complete().map(Some);
        } else {
            info!("Refreshing index: {} of {} messages present", entries, total);
            self.session.processed_messages = entries;
            self.session.last_indexed = self.store.oldest()?;
            self.refreshing = true;
        }
        if self.run_started.is_none() {
            self.session.begin_run(Utc::now());
            self.run_started = Some(Instant::now());
        }
        self.save_session()?;
        Ok(None)
    }

    fn index_next_page(&mut self) -> Result<StepOutcome> {
        self.refresh_total();

        let page = match self.fetcher.fetch_page(
            &self.config.label_id,
            self.session.last_indexed.as_ref(),
            self.config.page_size,
        ) {
            Ok(page) => page,
            Err(e) => return self.pause_for_remote(e),
        };
        if page.messages.is_empty() {
            return self.complete();
        }

        // Messages already in the store are not fetched again
        let mut indexed = Vec::with_capacity(page.messages.len());
        for meta in &page.messages {
            indexed.push(self.store.get(&meta.id)?.is_some());
        }
        let to_fetch: Vec<&MessageMetadata> = page
            .messages
            .iter()
            .zip(&indexed)
            .filter(|(_, indexed)| !**indexed)
            .map(|(meta, _)| meta)
            .collect();

        let fetcher = &self.fetcher;
        let transformer = self.transformer.as_ref();
        let cipher = self.cipher.as_ref();
        let prepared: Vec<Result<IndexEntry>> = self.pool.install(|| {
            to_fetch
                .par_iter()
                .map(|meta| match fetcher.fetch_detail(&meta.id) {
                    Ok(detail) => seal_message(transformer, cipher, &detail),
                    Err(IndexError::FetchFailed(e)) if e.is_permanent() => {
                        warn!("Message {} unavailable ({}), indexing metadata only", meta.id, e);
                        seal_metadata_only(cipher, meta)
                    }
                    Err(e) => Err(e),
                })
                .collect()
        });
        let mut prepared = prepared.into_iter();

        // Progress is recorded in page order and stops at the first message
        // to retry, so the cursor never moves past it
        for (meta, indexed) in page.messages.iter().zip(indexed) {
            if !indexed {
                let Some(result) = prepared.next() else {
                    break;
                };
                match result {
                    Ok(entry) => {
                        self.write_entry(&entry);
                        if self.session.pause_flags.contains(PauseReason::StoreFailure) {
                            break;
                        }
                    }
                    Err(e @ (IndexError::FetchFailed(_) | IndexError::RateLimited { .. })) => {
                        self.save_session()?;
                        return self.pause_for_remote(e);
                    }
                    Err(e) => warn!("Skipping message {}: {}", meta.id, e),
                }
            }
            self.session.record_processed(meta.cursor());
        }

        self.save_session()?;

        if self.session.pause_flags.contains(PauseReason::StoreFailure) {
            self.session.phase = BuildPhase::Paused;
            self.save_session()?;
            return Ok(StepOutcome::Paused);
        }
        if self.enforce_storage_limit()? {
            self.finish_run();
            self.save_session()?;
            return Ok(StepOutcome::Completed);
        }
        if self.session.is_caught_up() {
            return self.complete();
        }
        Ok(StepOutcome::Progressed)
    }

    fn write_entry(&mut self, entry: &IndexEntry) {
        match self.store.append(entry) {
            Ok(_) => self.write_failures = 0,
            Err(e) => {
                self.write_failures += 1;
                warn!(
                    "Index write failed ({} in a row): {}",
                    self.write_failures, e
                );
                if self.write_failures > self.config.max_consecutive_write_failures {
                    error!("Too many consecutive index write failures, pausing build");
                    self.session.pause_flags.set(PauseReason::StoreFailure, true);
                }
            }
        }
    }

    /// Shrink to the storage limit if it was crossed. Returns true if the
    /// index is now partial.
    fn enforce_storage_limit(&mut self) -> Result<bool> {
        let Some(limit) = self.config.effective_storage_limit() else {
            return Ok(false);
        };
        if self.store.size_bytes()? <= limit {
            return Ok(false);
        }

        let removed = self.store.shrink_to(limit)?;
        info!("Storage limit reached, index is partial ({} oldest removed)", removed);
        if let Some(feed) = &self.feed {
            feed.clear();
        }
        self.session.phase = BuildPhase::Partial;
        self.session.processed_messages = self.store.count()?;
        self.session.last_indexed = self.store.oldest()?;
        self.refreshing = false;
        Ok(true)
    }

    fn complete(&mut self) -> Result<StepOutcome> {
        self.session.phase = BuildPhase::Complete;
        self.refreshing = false;
        if let Err(e) = self.store.compact() {
            warn!("Index compaction failed: {}", e);
        }
        let entries = self.store.count()?;
        self.session.processed_messages = self.session.processed_messages.max(entries);
        info!("Index complete with {} entries", entries);
        self.metrics.record(MetricsEvent::IndexBuilt {
            entries,
            duration: self
                .run_started
                .map(|started| started.elapsed())
                .unwrap_or_default(),
            user_pauses: self.session.user_pauses,
            interruptions: self.session.interruptions,
        });
        self.finish_run();
        self.save_session()?;
        Ok(StepOutcome::Completed)
    }

    fn finish_run(&mut self) {
        self.run_started = None;
        self.transformer.clear_key_cache();
    }

    fn pause_for_remote(&mut self, e: IndexError) -> Result<StepOutcome> {
        warn!("Pausing index build: {}", e);
        if self
            .session
            .pause_flags
            .set(PauseReason::RemoteUnavailable, true)
        {
            self.session.interruptions += 1;
        }
        self.session.phase = BuildPhase::Paused;
        self.save_session()?;
        Ok(StepOutcome::Paused)
    }

    /// Move between downloading and paused to match the flags
    fn reevaluate_pause(&mut self) {
        let clear = self.session.pause_flags.is_clear();
        match self.session.phase {
            BuildPhase::Downloading if !clear => {
                self.session.interruptions += 1;
                self.session.phase = BuildPhase::Paused;
                info!(
                    "Index build paused: {:?}",
                    self.session.pause_flags.reasons()
                );
            }
            BuildPhase::Paused if clear => {
                self.session.phase = BuildPhase::Downloading;
                self.session.begin_run(Utc::now());
                info!("Index build resumed");
            }
            _ => {}
        }
    }

    fn refresh_total(&mut self) {
        if !interval_elapsed(
            self.session.last_total_refresh,
            self.config.total_refresh_interval_secs,
            Utc::now(),
        ) {
            return;
        }
        match self.fetcher.fetch_total(&self.config.label_id) {
            Ok(total) => {
                self.session.total_messages = total;
                self.session.last_total_refresh = Some(Utc::now());
            }
            Err(e) => debug!("Keeping previous total: {}", e),
        }
    }

    fn adjust_pool(&mut self, state: AppState) -> Result<()> {
        let background = state != AppState::Foreground;
        if background == self.pool_in_background {
            return Ok(());
        }
        let workers = if background {
            self.config.background_workers
        } else {
            self.config.foreground_workers
        };
        if workers != self.pool.current_num_threads() {
            self.pool = build_pool(workers)?;
            debug!("Index worker pool resized to {}", workers);
        }
        self.pool_in_background = background;
        Ok(())
    }

    fn replay_next_event(&mut self) -> Result<StepOutcome> {
        let Some(event) = self.pending_events.pop_front() else {
            return Ok(StepOutcome::Idle);
        };
        self.apply_one(event)?;
        Ok(if self.pending_events.is_empty() {
            StepOutcome::Completed
        } else {
            StepOutcome::Progressed
        })
    }

    fn apply_one(&mut self, event: MailboxEvent) -> Result<()> {
        match event {
            MailboxEvent::Insert(detail) => {
                let entry = match seal_message(&self.transformer, &self.cipher, &detail) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Not indexing inserted message {}: {}", detail.metadata.id, e);
                        return Ok(());
                    }
                };
                match self.store.append(&entry) {
                    Ok(AppendOutcome::Inserted) => {
                        self.session.total_messages += 1;
                        self.session.processed_messages += 1;
                    }
                    Ok(AppendOutcome::Replaced) => {}
                    Err(e) => {
                        warn!("Failed to index inserted message {}: {}", entry.message_id, e);
                        return Ok(());
                    }
                }
                if let Some(feed) = &self.feed {
                    feed.upsert(&entry);
                }
            }
            MailboxEvent::UpdateMetadata(update) => {
                let Some(mut entry) = self.store.get(&update.id)? else {
                    debug!("Metadata update for unindexed message {}", update.id);
                    return Ok(());
                };
                entry.is_starred = update.label_ids.contains(labels::STARRED);
                entry.location = Location::from_labels(&update.label_ids);
                entry.label_ids = update.label_ids;
                entry.is_unread = update.unread;
                // Append replaces in place; a failed write keeps the old entry
                self.store.append(&entry)?;
                if let Some(feed) = &self.feed {
                    feed.upsert(&entry);
                }
            }
            MailboxEvent::Delete(id) => {
                if self.store.remove(&id)? {
                    self.session.total_messages = self.session.total_messages.saturating_sub(1);
                    self.session.processed_messages =
                        self.session.processed_messages.saturating_sub(1);
                }
                if let Some(feed) = &self.feed {
                    feed.remove(&id);
                }
            }
        }
        self.save_session()
    }

    fn save_session(&self) -> Result<()> {
        if self.session.phase == BuildPhase::Disabled {
            return Ok(());
        }
        self.store.save_session(&self.session)
    }
}

/// Decrypt, clean and re-encrypt one message into an index entry
fn seal_message(
    transformer: &ContentTransformer,
    cipher: &Cipher,
    detail: &MessageDetail,
) -> Result<IndexEntry> {
    let transformed = transformer.transform(detail);
    seal(
        cipher,
        &detail.metadata,
        &transformed.record,
        transformed.decryption_failed,
    )
}

/// Entry for a message whose body the server will not return. Searchable
/// by its metadata and reported with the failed decryptions.
fn seal_metadata_only(cipher: &Cipher, meta: &MessageMetadata) -> Result<IndexEntry> {
    let record = ContentRecord {
        subject: meta.subject.clone(),
        sender: meta.sender.clone(),
        to: meta.to.clone(),
        cc: meta.cc.clone(),
        bcc: meta.bcc.clone(),
        body: String::new(),
    };
    seal(cipher, meta, &record, true)
}

fn seal(
    cipher: &Cipher,
    meta: &MessageMetadata,
    record: &ContentRecord,
    decryption_failed: bool,
) -> Result<IndexEntry> {
    let sealed = cipher.encrypt(record)?;
    Ok(IndexEntry {
        message_id: meta.id.clone(),
        time: meta.time,
        order: meta.order,
        label_ids: meta.label_ids.clone(),
        is_starred: meta.is_starred(),
        is_unread: meta.unread,
        location: meta.location(),
        has_body: !decryption_failed,
        decryption_failed,
        encryption_iv: sealed.iv,
        encrypted_content: sealed.ciphertext,
    })
}

fn build_pool(workers: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("esearch-index-{i}"))
        .build()
        .map_err(|e| IndexError::Storage(format!("failed to start index workers: {e}")))
}
