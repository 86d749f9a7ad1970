//! Build session: the durable checkpoint of an index build

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::IndexCursor;
use super::state::{BuildPhase, PauseFlags};

/// Progress of the index build for one user
///
/// Persisted in the index store's metadata table after every page so a
/// restarted process resumes from `last_indexed` without refetching newer
/// messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSession {
    pub user_id: String,
    pub phase: BuildPhase,
    /// Server-reported message count, refreshed periodically
    pub total_messages: u64,
    pub processed_messages: u64,
    /// Oldest entry processed so far; pages are fetched strictly below it
    pub last_indexed: Option<IndexCursor>,
    pub pause_flags: PauseFlags,
    pub started_at: Option<DateTime<Utc>>,
    /// `processed_messages` when `started_at` was taken, for rate estimation
    #[serde(default)]
    pub processed_at_start: u64,
    pub last_total_refresh: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_pauses: u32,
    #[serde(default)]
    pub interruptions: u32,
}

impl BuildSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            phase: BuildPhase::Disabled,
            total_messages: 0,
            processed_messages: 0,
            last_indexed: None,
            pause_flags: PauseFlags::new(),
            started_at: None,
            processed_at_start: 0,
            last_total_refresh: None,
            user_pauses: 0,
            interruptions: 0,
        }
    }

    /// Oldest indexed time, the resumption cursor
    pub fn last_indexed_time(&self) -> Option<i64> {
        self.last_indexed.as_ref().map(|c| c.time)
    }

    /// Start the rate clock for this run of the build
    pub fn begin_run(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        self.processed_at_start = self.processed_messages;
    }

    /// Record one processed message, moving the cursor if it is older
    pub fn record_processed(&mut self, cursor: IndexCursor) {
        self.processed_messages += 1;
        let older = self
            .last_indexed
            .as_ref()
            .is_none_or(|current| current.precedes(&cursor));
        if older {
            self.last_indexed = Some(cursor);
        }
    }

    pub fn is_caught_up(&self) -> bool {
        self.processed_messages >= self.total_messages
    }

    /// Drop everything except the user ID
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.user_id));
    }

    /// Estimate the remaining build time from the rate since `started_at`
    pub fn estimate_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started_at = self.started_at?;
        let done = self.processed_messages.checked_sub(self.processed_at_start)?;
        if done == 0 {
            return None;
        }
        let elapsed_ms = (now - started_at).num_milliseconds();
        if elapsed_ms <= 0 {
            return None;
        }
        let remaining = self.total_messages.saturating_sub(self.processed_messages);
        let ms_per_message = elapsed_ms as f64 / done as f64;
        Some(Duration::from_millis((ms_per_message * remaining as f64) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_record_processed_only_moves_cursor_backwards() {
        let mut session = BuildSession::new("user-1");
        session.record_processed(IndexCursor::new(300, 0, "c"));
        session.record_processed(IndexCursor::new(200, 0, "b"));
        // A retried newer message must not move the cursor forward
        session.record_processed(IndexCursor::new(250, 0, "x"));

        assert_eq!(session.processed_messages, 3);
        assert_eq!(session.last_indexed_time(), Some(200));
    }

    #[test]
    fn test_estimate_remaining() {
        let mut session = BuildSession::new("user-1");
        session.total_messages = 300;
        let start = Utc::now();
        session.begin_run(start);
        assert!(session.estimate_remaining(start).is_none());

        for i in 0..100 {
            session.record_processed(IndexCursor::new(1000 - i, 0, format!("m{i}")));
        }
        let estimate = session
            .estimate_remaining(start + ChronoDuration::seconds(10))
            .unwrap();
        // 100 messages in 10s, 200 left
        assert_eq!(estimate.as_secs(), 20);
    }

    #[test]
    fn test_reset_keeps_user() {
        let mut session = BuildSession::new("user-1");
        session.processed_messages = 10;
        session.total_messages = 20;
        session.phase = BuildPhase::Paused;
        session.reset();

        assert_eq!(session, BuildSession::new("user-1"));
    }

    #[test]
    fn test_serialization() {
        let mut session = BuildSession::new("user-1");
        session.last_indexed = Some(IndexCursor::new(200, 1, "m2"));
        let json = serde_json::to_string(&session).unwrap();
        let restored: BuildSession = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
    }
}
