//! Paginated fetches with bounded rate-limit retries

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::{MessageDetail, MessagePage, RemoteError, RemoteMessageStore};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::models::{IndexCursor, MessageId};

/// Delay used when a rate-limit response carries no retry-after hint
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Fetches listing pages and message details from the remote store
///
/// A 429-equivalent response is retried after the server's retry-after
/// delay (capped), at most `max_retries` times, in a loop. Any other
/// failure is returned as `FetchFailed` for the caller to pause on.
pub struct PageFetcher {
    remote: Arc<dyn RemoteMessageStore>,
    max_retries: u32,
    max_delay: Duration,
    sleep: fn(Duration),
}

impl PageFetcher {
    pub fn new(remote: Arc<dyn RemoteMessageStore>, config: &IndexConfig) -> Self {
        Self {
            remote,
            max_retries: config.max_rate_limit_retries,
            max_delay: config.max_retry_delay(),
            sleep: std::thread::sleep,
        }
    }

    /// Replace the sleep used between retries
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn remote(&self) -> &Arc<dyn RemoteMessageStore> {
        &self.remote
    }

    /// Fetch the page of messages strictly older than `before`
    pub fn fetch_page(
        &self,
        label_id: &str,
        before: Option<&IndexCursor>,
        page_size: usize,
    ) -> Result<MessagePage> {
        debug!(
            "Fetching page label={} before={:?} size={}",
            label_id,
            before.map(|c| c.time),
            page_size
        );
        self.with_retry(|| self.remote.list_messages(label_id, before, page_size))
    }

    /// Server-reported number of messages under `label_id`
    pub fn fetch_total(&self, label_id: &str) -> Result<u64> {
        Ok(self
            .with_retry(|| self.remote.list_messages(label_id, None, 1))?
            .total)
    }

    pub fn fetch_detail(&self, id: &MessageId) -> Result<MessageDetail> {
        self.with_retry(|| self.remote.get_message_detail(id))
    }

    fn with_retry<T>(&self, op: impl Fn() -> std::result::Result<T, RemoteError>) -> Result<T> {
        let mut attempts = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(RemoteError::RateLimited { retry_after }) => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        warn!("Giving up after {} rate-limited attempts", attempts);
                        return Err(IndexError::RateLimited {
                            attempts,
                            retry_after,
                        });
                    }
                    let delay = self.retry_delay(retry_after, attempts);
                    warn!(
                        "Rate limited, retrying in {:?} (attempt {}/{})",
                        delay, attempts, self.max_retries
                    );
                    (self.sleep)(delay);
                }
                Err(e) => return Err(IndexError::FetchFailed(e)),
            }
        }
    }

    /// Server hint if present, else exponential backoff with jitter; never
    /// longer than `max_delay`
    fn retry_delay(&self, retry_after: Option<Duration>, attempt: u32) -> Duration {
        let delay = retry_after.unwrap_or_else(|| {
            let exponent = attempt.saturating_sub(1).min(16);
            BASE_BACKOFF * 2u32.pow(exponent) + Duration::from_millis(rand_jitter())
        });
        delay.min(self.max_delay)
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}
