//! esearch - encrypted on-device search over a remote mailbox
//!
//! This crate builds and queries a local full-text index of end-to-end
//! encrypted mail:
//! - Per-user index key kept in the platform secret store
//! - Content records sealed with XChaCha20-Poly1305 before they touch disk
//! - Resumable, pausable background build driven by device conditions
//! - Two-phase keyword search over a decrypted recency cache, then the index
//!
//! Message decryption and the remote mailbox API are host collaborators,
//! exposed as traits here and as callback interfaces over UniFFI.

pub mod build;
pub mod config;
pub mod crypto;
pub mod environment;
pub mod error;
pub mod ffi;
pub mod metrics;
pub mod models;
pub mod remote;
pub mod search;
pub mod service;
pub mod store;
pub mod transform;

#[cfg(test)]
mod testing;

uniffi::setup_scaffolding!();

pub use build::{BuildCoordinator, IndexBuilder, MailboxEvent, MetadataUpdate};
pub use config::IndexConfig;
pub use crypto::{Cipher, IndexKey, KeyVault, KeyringSecretStore, MemorySecretStore, SecretStore};
pub use environment::{
    AppState, BatteryStatus, DeviceProbe, FixedProbe, NetworkStatus, Observation, SysinfoProbe,
    ThermalState,
};
pub use error::{IndexError, Result};
pub use metrics::{LogMetricsSink, MetricsEvent, MetricsSink, NoopMetrics};
pub use models::{
    BuildPhase, BuildSession, Contact, ContentRecord, IndexCursor, IndexEntry, IndexState,
    IndexStatus, Location, MessageId, PauseReason, StatusSummary,
};
pub use remote::{
    HttpRemoteStore, MessageDetail, MessageMetadata, MessagePage, RemoteError, RemoteMessageStore,
};
pub use search::{SearchEngine, SearchHit, SearchPage, SearchState, extract_keywords};
pub use service::{EncryptedSearchService, MessageResolver, NoopResolver, ServiceDeps};
pub use store::{InMemoryIndexStore, IndexStore, SqliteIndexStore};
pub use transform::{AddressKey, ContentTransformer, DecryptError, KeyProvider, MessageDecrypter};
