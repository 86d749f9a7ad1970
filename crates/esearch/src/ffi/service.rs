//! SearchService facade for UniFFI export

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::build::{MailboxEvent, MetadataUpdate};
use crate::config::IndexConfig;
use crate::crypto::KeyringSecretStore;
use crate::environment::SysinfoProbe;
use crate::error::IndexError;
use crate::ffi::types::*;
use crate::metrics::LogMetricsSink;
use crate::models::{IndexCursor, MessageId};
use crate::remote::{MessageDetail, MessagePage, RemoteError, RemoteMessageStore};
use crate::search::SearchState;
use crate::service::{EncryptedSearchService, NoopResolver, ServiceDeps};
use crate::transform::{AddressKey, DecryptError, KeyProvider, MessageDecrypter};

/// Adapts the host's remote store callback
struct RemoteBridge(Box<dyn FfiRemoteStore>);

impl RemoteMessageStore for RemoteBridge {
    fn list_messages(
        &self,
        label_id: &str,
        before: Option<&IndexCursor>,
        page_size: usize,
    ) -> Result<MessagePage, RemoteError> {
        let page = self.0.list_messages(
            label_id.to_string(),
            before.map(|c| c.time),
            before.map(|c| c.order),
            before.map(|c| c.message_id.0.clone()),
            page_size.min(u32::MAX as usize) as u32,
        )?;
        Ok(page.into())
    }

    fn get_message_detail(&self, id: &MessageId) -> Result<MessageDetail, RemoteError> {
        Ok(self.0.get_message_detail(id.0.clone())?.into())
    }
}

/// Adapts the host's crypto callback to both key and decryption roles
struct CryptoBridge(Box<dyn FfiCrypto>);

impl KeyProvider for CryptoBridge {
    fn candidate_keys(&self, address_id: &str) -> Result<Vec<AddressKey>, DecryptError> {
        let keys = self.0.candidate_keys(address_id.to_string())?;
        Ok(keys.into_iter().map(AddressKey::from).collect())
    }

    fn mailbox_passphrase(&self) -> Result<String, DecryptError> {
        Ok(self.0.mailbox_passphrase()?)
    }
}

impl MessageDecrypter for CryptoBridge {
    fn decrypt_with_token(
        &self,
        body: &str,
        key: &AddressKey,
        token: &str,
        passphrase: &str,
    ) -> Result<String, DecryptError> {
        Ok(self.0.decrypt_with_token(
            body.to_string(),
            key.into(),
            token.to_string(),
            passphrase.to_string(),
        )?)
    }

    fn decrypt_legacy(
        &self,
        body: &str,
        key: &AddressKey,
        passphrase: &str,
    ) -> Result<String, DecryptError> {
        Ok(self
            .0
            .decrypt_legacy(body.to_string(), key.into(), passphrase.to_string())?)
    }
}

/// Encrypted search for one signed-in user
///
/// Owns the background index build. Only one search is paged at a time:
/// `search` starts a new one and `next_page` continues it.
#[derive(uniffi::Object)]
pub struct SearchService {
    inner: EncryptedSearchService,
    current_search: Mutex<Option<SearchState>>,
}

#[uniffi::export]
impl SearchService {
    /// Open the index for `user_id` under `index_root`, or under the
    /// platform data directory when `index_root` is `None`
    ///
    /// The index key lives in the platform keyring. Tunables come from
    /// `esearch.json` in the config directory when present.
    #[uniffi::constructor]
    pub fn new(
        user_id: String,
        index_root: Option<String>,
        remote: Box<dyn FfiRemoteStore>,
        crypto: Box<dyn FfiCrypto>,
    ) -> Result<Arc<Self>, SearchError> {
        let config = IndexConfig::load().unwrap_or_else(|e| {
            warn!("Using default index config: {:#}", e);
            IndexConfig::default()
        });
        let crypto = Arc::new(CryptoBridge(crypto));
        let deps = ServiceDeps {
            remote: Arc::new(RemoteBridge(remote)),
            keys: crypto.clone(),
            decrypter: crypto,
            secrets: Arc::new(KeyringSecretStore::new()),
            resolver: Arc::new(NoopResolver),
            metrics: Arc::new(LogMetricsSink),
            probe: Arc::new(SysinfoProbe::new()),
        };

        let index_root = match index_root {
            Some(root) => PathBuf::from(root),
            None => ::config::ensure_data_dir().map_err(|e| SearchError::Storage {
                message: format!("{e:#}"),
            })?,
        };
        let opened =
            EncryptedSearchService::open(&user_id, &index_root, config.clone(), deps.clone());
        let inner = match opened {
            Ok(service) => service,
            Err(IndexError::IndexCorrupt(reason)) => {
                warn!("Search index unusable ({}), rebuilding", reason);
                EncryptedSearchService::rebuild_from_scratch(&user_id, &index_root, config, deps)?
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Arc::new(Self {
            inner,
            current_search: Mutex::new(None),
        }))
    }

    // ========================================================================
    // Build Control
    // ========================================================================

    pub fn enable(&self) -> Result<(), SearchError> {
        Ok(self.inner.enable()?)
    }

    pub fn pause(&self) -> Result<(), SearchError> {
        Ok(self.inner.pause()?)
    }

    pub fn resume(&self) -> Result<(), SearchError> {
        Ok(self.inner.resume()?)
    }

    /// Remove the index. Indexing stays off until `enable`.
    pub fn delete_index(&self) -> Result<(), SearchError> {
        self.clear_search();
        Ok(self.inner.delete_index()?)
    }

    pub fn rebuild(&self) -> Result<(), SearchError> {
        self.clear_search();
        Ok(self.inner.rebuild()?)
    }

    pub fn status(&self) -> FfiIndexStatus {
        self.inner.status().into()
    }

    /// `None` removes the limit
    pub fn set_storage_limit(&self, limit_bytes: Option<u64>) -> Result<(), SearchError> {
        Ok(self.inner.set_storage_limit(limit_bytes)?)
    }

    // ========================================================================
    // Environment
    // ========================================================================

    pub fn observe_network(&self, status: FfiNetworkStatus) -> Result<(), SearchError> {
        Ok(self.inner.observe_network(status.into())?)
    }

    pub fn observe_thermal(&self, state: FfiThermalState) -> Result<(), SearchError> {
        Ok(self.inner.observe_thermal(state.into())?)
    }

    pub fn observe_battery(&self, battery: FfiBatteryStatus) -> Result<(), SearchError> {
        Ok(self.inner.observe_battery(battery.into())?)
    }

    pub fn observe_app_state(&self, state: FfiAppState) -> Result<(), SearchError> {
        Ok(self.inner.observe_app_state(state.into())?)
    }

    pub fn set_allow_mobile_data(&self, allow: bool) -> Result<(), SearchError> {
        Ok(self.inner.set_allow_mobile_data(allow)?)
    }

    // ========================================================================
    // Mailbox Events
    // ========================================================================

    pub fn apply_insert(&self, detail: FfiMessageDetail) -> Result<(), SearchError> {
        Ok(self.inner.apply_event(MailboxEvent::Insert(detail.into()))?)
    }

    pub fn apply_metadata_update(
        &self,
        message_id: String,
        label_ids: Vec<String>,
        unread: bool,
    ) -> Result<(), SearchError> {
        let update = MetadataUpdate {
            id: MessageId::new(message_id),
            label_ids: label_ids.into_iter().collect(),
            unread,
        };
        Ok(self.inner.apply_event(MailboxEvent::UpdateMetadata(update))?)
    }

    pub fn apply_delete(&self, message_id: String) -> Result<(), SearchError> {
        Ok(self
            .inner
            .apply_event(MailboxEvent::Delete(MessageId::new(message_id)))?)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Start a new search and return its first page
    pub fn search(&self, query: String) -> Result<FfiSearchPage, SearchError> {
        let (state, page) = self.inner.search(&query)?;
        let mut current = self.lock_search()?;
        *current = Some(state);
        Ok(page.into())
    }

    /// Next page of the current search; empty and complete if there is none
    pub fn next_page(&self) -> Result<FfiSearchPage, SearchError> {
        let mut current = self.lock_search()?;
        match current.as_mut() {
            Some(state) => Ok(self.inner.next_page(state)?.into()),
            None => Ok(FfiSearchPage {
                hits: Vec::new(),
                is_complete: true,
            }),
        }
    }

    /// Current metadata of a hit's message
    pub fn resolve_hit(&self, hit: FfiSearchHit) -> Result<FfiMessageMetadata, SearchError> {
        let id = MessageId::new(hit.message_id);
        let metadata = self.inner.resolve_hit(&id)?;
        Ok(metadata.into())
    }
}

impl SearchService {
    fn lock_search(&self) -> Result<std::sync::MutexGuard<'_, Option<SearchState>>, SearchError> {
        self.current_search.lock().map_err(|_| SearchError::Storage {
            message: "search state lock poisoned".into(),
        })
    }

    fn clear_search(&self) {
        if let Ok(mut current) = self.current_search.lock() {
            *current = None;
        }
    }
}
