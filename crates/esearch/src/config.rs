//! Tunables for index building and search
//!
//! Loaded from `esearch.json` in the shared config directory when present.
//! Every field has a default, so a partial file only overrides what it names.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Config filename in the esearch config directory
const CONFIG_FILE: &str = "esearch.json";

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Remote label whose messages are indexed ("5" is all mail)
    pub label_id: String,
    /// Messages requested per page fetch
    pub page_size: usize,
    /// Worker threads per page while the app is in the foreground
    pub foreground_workers: usize,
    /// Worker threads per page while the app is in the background
    pub background_workers: usize,
    /// Index over cellular connections
    pub allow_mobile_data: bool,
    /// Free disk space below which the build pauses
    pub low_storage_limit_bytes: u64,
    /// Maximum index size; `None` means unlimited
    pub storage_limit_bytes: Option<u64>,
    /// Headroom kept below `storage_limit_bytes`
    pub storage_limit_margin_bytes: u64,
    /// Fraction of available memory the decrypted cache may use
    pub cache_memory_fraction: f64,
    /// Fraction of available memory one index-phase search batch may use
    pub search_memory_fraction: f64,
    /// Estimated in-memory size of one decrypted record
    pub record_size_estimate: u64,
    /// Upper bound on one index-phase batch
    pub max_search_batch: usize,
    /// Results per search page
    pub search_page_size: usize,
    /// Characters of context on each side of a snippet match
    pub snippet_context_chars: usize,
    pub max_rate_limit_retries: u32,
    pub max_retry_delay_secs: u64,
    /// Consecutive failed appends before the build pauses as unhealthy
    pub max_consecutive_write_failures: u32,
    /// Minimum seconds between refreshes of the server message count
    pub total_refresh_interval_secs: u64,
    /// Ciphertexts larger than this are stored outside the database
    pub out_of_line_threshold_bytes: usize,
    /// Battery level (0.0..=1.0) below which the build pauses when unplugged
    pub low_battery_threshold: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            label_id: crate::models::labels::ALL_MAIL.to_string(),
            page_size: 150,
            foreground_workers: 10,
            background_workers: 10,
            allow_mobile_data: false,
            low_storage_limit_bytes: 100 * MB,
            storage_limit_bytes: None,
            storage_limit_margin_bytes: 2 * MB,
            cache_memory_fraction: 0.2,
            search_memory_fraction: 0.1,
            record_size_estimate: 14_000,
            max_search_batch: 10_000,
            search_page_size: 15,
            snippet_context_chars: 100,
            max_rate_limit_retries: 5,
            max_retry_delay_secs: 60,
            max_consecutive_write_failures: 25,
            total_refresh_interval_secs: 300,
            out_of_line_threshold_bytes: 64 * 1024,
            low_battery_threshold: 0.2,
        }
    }
}

impl IndexConfig {
    /// Load from the config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        if config::config_exists(CONFIG_FILE) {
            let loaded: IndexConfig = config::load_json(CONFIG_FILE)?;
            return Ok(loaded.validated());
        }
        Ok(Self::default())
    }

    /// Load from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let loaded: IndexConfig = config::load_json_file(path)?;
        Ok(loaded.validated())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let loaded: IndexConfig =
            serde_json::from_str(json).context("Failed to parse index config JSON")?;
        Ok(loaded.validated())
    }

    /// Persist to the config directory
    pub fn save(&self) -> Result<()> {
        config::save_json(CONFIG_FILE, self)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }

    /// Size limit with the safety margin applied
    pub fn effective_storage_limit(&self) -> Option<u64> {
        self.storage_limit_bytes
            .map(|limit| limit.saturating_sub(self.storage_limit_margin_bytes))
    }

    /// Clamp values that would stall the build or the search
    fn validated(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.foreground_workers = self.foreground_workers.max(1);
        self.background_workers = self.background_workers.max(1);
        self.search_page_size = self.search_page_size.max(1);
        self.max_search_batch = self.max_search_batch.max(1);
        self.record_size_estimate = self.record_size_estimate.max(1);
        self.cache_memory_fraction = self.cache_memory_fraction.clamp(0.0, 1.0);
        self.search_memory_fraction = self.search_memory_fraction.clamp(0.0, 1.0);
        self
    }
}
