//! Per-user encrypted search service
//!
//! Wires the key vault, the SQLite index store, the search engine and the
//! build coordinator together for one signed-in user.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::build::{BuildCoordinator, BuilderParts, IndexBuilder, MailboxEvent};
use crate::config::IndexConfig;
use crate::crypto::{Cipher, KeyVault, SecretStore};
use crate::environment::{
    AppState, BatteryStatus, DeviceProbe, NetworkStatus, Observation, ThermalState,
};
use crate::error::{IndexError, Result};
use crate::metrics::MetricsSink;
use crate::models::{IndexStatus, MessageId};
use crate::remote::{MessageMetadata, PageFetcher, RemoteMessageStore};
use crate::search::{SearchEngine, SearchPage, SearchState};
use crate::store::{IndexStore, SqliteIndexStore};
use crate::transform::{ContentTransformer, KeyProvider, MessageDecrypter};

/// Looks up the current metadata of a message the host already has loaded
pub trait MessageResolver: Send + Sync {
    fn resolve(&self, id: &MessageId) -> Option<MessageMetadata>;
}

/// Resolver that knows nothing; every hit goes to the remote store
pub struct NoopResolver;

impl MessageResolver for NoopResolver {
    fn resolve(&self, _id: &MessageId) -> Option<MessageMetadata> {
        None
    }
}

/// Host-provided collaborators
#[derive(Clone)]
pub struct ServiceDeps {
    pub remote: Arc<dyn RemoteMessageStore>,
    pub keys: Arc<dyn KeyProvider>,
    pub decrypter: Arc<dyn MessageDecrypter>,
    pub secrets: Arc<dyn SecretStore>,
    pub resolver: Arc<dyn MessageResolver>,
    pub metrics: Arc<dyn MetricsSink>,
    pub probe: Arc<dyn DeviceProbe>,
}

pub struct EncryptedSearchService {
    user_id: String,
    store: Arc<SqliteIndexStore>,
    engine: SearchEngine,
    coordinator: BuildCoordinator,
    remote: Arc<dyn RemoteMessageStore>,
    resolver: Arc<dyn MessageResolver>,
}

impl EncryptedSearchService {
    /// Open the index for `user_id` under `index_root`
    ///
    /// Fails with [`IndexError::KeyUnavailable`] if the index key cannot be
    /// read (for example while the device is locked) and with
    /// [`IndexError::IndexCorrupt`] if the store is unusable; recover from
    /// the latter with [`EncryptedSearchService::rebuild_from_scratch`].
    pub fn open(
        user_id: &str,
        index_root: &Path,
        config: IndexConfig,
        deps: ServiceDeps,
    ) -> Result<Self> {
        let key = KeyVault::new(deps.secrets.clone()).get_or_create_key(user_id)?;
        let cipher = Arc::new(Cipher::new(&key));

        let user_dir = SqliteIndexStore::user_dir(index_root, user_id);
        let store = Arc::new(SqliteIndexStore::open(
            &user_dir,
            config.out_of_line_threshold_bytes,
        )?);
        let index: Arc<dyn IndexStore> = store.clone();

        let engine = SearchEngine::new(
            index.clone(),
            cipher.clone(),
            deps.probe.clone(),
            deps.metrics.clone(),
            &config,
        );

        let retry_delay = config.max_retry_delay();
        let parts = BuilderParts {
            store: index,
            fetcher: PageFetcher::new(deps.remote.clone(), &config),
            transformer: Arc::new(ContentTransformer::new(deps.keys, deps.decrypter)),
            cipher,
            metrics: deps.metrics,
            feed: Some(engine.cache_feed()),
        };
        // The saved session is read on the build thread; status stays
        // undetermined until it is
        let owner = user_id.to_string();
        let coordinator = BuildCoordinator::spawn(
            move || IndexBuilder::new(&owner, config, parts),
            deps.probe,
            user_dir,
            retry_delay,
        )?;

        info!("Opened encrypted search for {}", user_id);
        Ok(Self {
            user_id: user_id.to_string(),
            store,
            engine,
            coordinator,
            remote: deps.remote,
            resolver: deps.resolver,
        })
    }

    /// Throw away whatever is on disk for `user_id`, reopen and start a
    /// fresh build. The way out of [`IndexError::IndexCorrupt`].
    pub fn rebuild_from_scratch(
        user_id: &str,
        index_root: &Path,
        config: IndexConfig,
        deps: ServiceDeps,
    ) -> Result<Self> {
        info!("Rebuilding search index for {} from scratch", user_id);
        SqliteIndexStore::destroy(SqliteIndexStore::user_dir(index_root, user_id))?;
        let service = Self::open(user_id, index_root, config, deps)?;
        service.enable()?;
        Ok(service)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn index_dir(&self) -> PathBuf {
        self.store.root().to_path_buf()
    }

    pub fn enable(&self) -> Result<()> {
        self.coordinator.enable()
    }

    pub fn pause(&self) -> Result<()> {
        self.coordinator.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.coordinator.resume()
    }

    /// Remove every entry and the build checkpoint. The key is kept.
    pub fn delete_index(&self) -> Result<()> {
        self.coordinator.delete()
    }

    /// Delete and build again, retrying messages that failed to decrypt
    pub fn rebuild(&self) -> Result<()> {
        self.coordinator.rebuild()
    }

    pub fn status(&self) -> IndexStatus {
        self.coordinator.status()
    }

    pub fn coordinator(&self) -> &BuildCoordinator {
        &self.coordinator
    }

    pub fn observe_network(&self, status: NetworkStatus) -> Result<()> {
        self.coordinator.observe(Observation::Network(status))
    }

    pub fn observe_thermal(&self, state: ThermalState) -> Result<()> {
        self.coordinator.observe(Observation::Thermal(state))
    }

    pub fn observe_battery(&self, battery: BatteryStatus) -> Result<()> {
        self.coordinator.observe(Observation::Battery(battery))
    }

    pub fn observe_app_state(&self, state: AppState) -> Result<()> {
        self.coordinator.observe(Observation::AppState(state))
    }

    pub fn set_allow_mobile_data(&self, allow: bool) -> Result<()> {
        self.coordinator.observe(Observation::AllowMobileData(allow))
    }

    /// `None` removes the limit
    pub fn set_storage_limit(&self, limit_bytes: Option<u64>) -> Result<()> {
        self.coordinator.set_storage_limit(limit_bytes)
    }

    pub fn apply_event(&self, event: MailboxEvent) -> Result<()> {
        self.coordinator.apply_event(event)
    }

    pub fn start_search(&self, query: &str) -> Result<SearchState> {
        self.engine.start(query)
    }

    pub fn search(&self, query: &str) -> Result<(SearchState, SearchPage)> {
        self.engine.search(query)
    }

    pub fn next_page(&self, state: &mut SearchState) -> Result<SearchPage> {
        self.engine.next_page(state)
    }

    /// Current metadata for a search hit, from the host if it has the
    /// message loaded, otherwise from the remote store
    pub fn resolve_hit(&self, id: &MessageId) -> Result<MessageMetadata> {
        if let Some(metadata) = self.resolver.resolve(id) {
            return Ok(metadata);
        }
        self.remote
            .get_message_detail(id)
            .map(|detail| detail.metadata)
            .map_err(IndexError::FetchFailed)
    }

    /// Messages indexed with metadata only
    pub fn failed_decryptions(&self) -> Result<Vec<MessageId>> {
        self.store.failed_decryptions()
    }

    /// Bytes the index occupies on disk
    pub fn disk_usage(&self) -> Result<u64> {
        self.store.disk_usage()
    }
}
