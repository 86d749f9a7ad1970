//! FFI-friendly records, enums and callback interfaces
//!
//! Identifiers cross the boundary as strings, times as Unix seconds and
//! durations as whole seconds.

use std::time::Duration;

use crate::environment::{AppState, BatteryStatus, NetworkStatus, ThermalState};
use crate::error::IndexError;
use crate::models::{Contact, IndexState, IndexStatus, Location, MessageId};
use crate::remote::{MessageDetail, MessageMetadata, MessagePage, RemoteError};
use crate::search::{FieldHighlight, HighlightSpan, SearchHit, SearchPage};
use crate::transform::{AddressKey, DecryptError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum SearchError {
    #[error("Index key unavailable: {message}")]
    KeyUnavailable { message: String },

    /// The index must be rebuilt from scratch
    #[error("Search index unusable: {message}")]
    IndexCorrupt { message: String },

    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    /// Returned by the host's remote store on a 429-equivalent response
    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Decryption failed: {message}")]
    Decryption { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Search service stopped")]
    Stopped,

    #[error("Callback error: {message}")]
    Callback { message: String },
}

impl From<IndexError> for SearchError {
    fn from(e: IndexError) -> Self {
        let message = e.to_string();
        match e {
            IndexError::KeyUnavailable(_) => SearchError::KeyUnavailable { message },
            IndexError::IndexCorrupt(_) => SearchError::IndexCorrupt { message },
            IndexError::FetchFailed(_) => SearchError::Fetch { message },
            IndexError::RateLimited { retry_after, .. } => SearchError::RateLimited {
                retry_after_secs: retry_after.map(|d| d.as_secs()),
            },
            IndexError::AuthenticationFailed | IndexError::DecryptionFailed(_) => {
                SearchError::Decryption { message }
            }
            IndexError::StoreWriteFailed { .. }
            | IndexError::Storage(_)
            | IndexError::Serialization(_) => SearchError::Storage { message },
            IndexError::Stopped => SearchError::Stopped,
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for SearchError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        SearchError::Callback { message: e.reason }
    }
}

impl From<SearchError> for RemoteError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::RateLimited { retry_after_secs } => RemoteError::RateLimited {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            other => RemoteError::Transport(other.to_string()),
        }
    }
}

impl From<SearchError> for DecryptError {
    fn from(e: SearchError) -> Self {
        DecryptError(e.to_string())
    }
}

// ============================================================================
// Message Types
// ============================================================================

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiContact {
    pub name: Option<String>,
    pub address: String,
}

impl From<Contact> for FfiContact {
    fn from(c: Contact) -> Self {
        Self {
            name: c.name,
            address: c.address,
        }
    }
}

impl From<FfiContact> for Contact {
    fn from(c: FfiContact) -> Self {
        match c.name {
            Some(name) => Contact::with_name(name, c.address),
            None => Contact::new(c.address),
        }
    }
}

fn contacts(list: Vec<FfiContact>) -> Vec<Contact> {
    list.into_iter().map(Contact::from).collect()
}

/// Message metadata as listed by the host's remote store
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMessageMetadata {
    pub id: String,
    /// Unix timestamp (seconds since epoch)
    pub time: i64,
    pub order: i64,
    pub label_ids: Vec<String>,
    pub unread: bool,
    pub subject: String,
    pub sender: FfiContact,
    pub to: Vec<FfiContact>,
    pub cc: Vec<FfiContact>,
    pub bcc: Vec<FfiContact>,
    pub address_id: String,
    pub num_attachments: u32,
}

impl From<FfiMessageMetadata> for MessageMetadata {
    fn from(m: FfiMessageMetadata) -> Self {
        Self {
            id: MessageId::new(m.id),
            time: m.time,
            order: m.order,
            label_ids: m.label_ids.into_iter().collect(),
            unread: m.unread,
            subject: m.subject,
            sender: m.sender.into(),
            to: contacts(m.to),
            cc: contacts(m.cc),
            bcc: contacts(m.bcc),
            address_id: m.address_id,
            num_attachments: m.num_attachments,
        }
    }
}

impl From<MessageMetadata> for FfiMessageMetadata {
    fn from(m: MessageMetadata) -> Self {
        let contacts = |list: Vec<Contact>| list.into_iter().map(FfiContact::from).collect();
        Self {
            id: m.id.0,
            time: m.time,
            order: m.order,
            label_ids: m.label_ids.into_iter().collect(),
            unread: m.unread,
            subject: m.subject,
            sender: m.sender.into(),
            to: contacts(m.to),
            cc: contacts(m.cc),
            bcc: contacts(m.bcc),
            address_id: m.address_id,
            num_attachments: m.num_attachments,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMessageDetail {
    pub metadata: FfiMessageMetadata,
    /// Armored encrypted body
    pub body: String,
    pub mime_type: String,
}

impl From<FfiMessageDetail> for MessageDetail {
    fn from(d: FfiMessageDetail) -> Self {
        Self {
            metadata: d.metadata.into(),
            body: d.body,
            mime_type: d.mime_type,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMessagePage {
    pub messages: Vec<FfiMessageMetadata>,
    pub total: u64,
}

impl From<FfiMessagePage> for MessagePage {
    fn from(p: FfiMessagePage) -> Self {
        Self {
            messages: p.messages.into_iter().map(MessageMetadata::from).collect(),
            total: p.total,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAddressKey {
    pub id: String,
    pub armored_key: String,
    pub token: Option<String>,
}

impl From<FfiAddressKey> for AddressKey {
    fn from(k: FfiAddressKey) -> Self {
        Self {
            id: k.id,
            armored_key: k.armored_key,
            token: k.token,
        }
    }
}

impl From<&AddressKey> for FfiAddressKey {
    fn from(k: &AddressKey) -> Self {
        Self {
            id: k.id.clone(),
            armored_key: k.armored_key.clone(),
            token: k.token.clone(),
        }
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiIndexState {
    Undetermined,
    Disabled,
    Downloading,
    Refresh,
    Background,
    Paused,
    BackgroundStopped,
    LowStorage,
    Partial,
    Complete,
}

impl From<IndexState> for FfiIndexState {
    fn from(s: IndexState) -> Self {
        match s {
            IndexState::Undetermined => FfiIndexState::Undetermined,
            IndexState::Disabled => FfiIndexState::Disabled,
            IndexState::Downloading => FfiIndexState::Downloading,
            IndexState::Refresh => FfiIndexState::Refresh,
            IndexState::Background => FfiIndexState::Background,
            IndexState::Paused => FfiIndexState::Paused,
            IndexState::BackgroundStopped => FfiIndexState::BackgroundStopped,
            IndexState::LowStorage => FfiIndexState::LowStorage,
            IndexState::Partial => FfiIndexState::Partial,
            IndexState::Complete => FfiIndexState::Complete,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiIndexStatus {
    pub state: FfiIndexState,
    pub processed_messages: u64,
    pub total_messages: u64,
    /// Pause reason identifiers, e.g. "low-battery"
    pub pause_reasons: Vec<String>,
    pub estimated_remaining_secs: Option<u64>,
    /// 0.0 to 1.0
    pub progress: f64,
    pub write_failures: u32,
}

impl From<IndexStatus> for FfiIndexStatus {
    fn from(s: IndexStatus) -> Self {
        Self {
            state: s.state.into(),
            processed_messages: s.processed_messages,
            total_messages: s.total_messages,
            pause_reasons: s.pause_reasons.iter().map(|r| r.as_str().to_string()).collect(),
            estimated_remaining_secs: s.estimated_remaining.map(|d| d.as_secs()),
            progress: s.progress(),
            write_failures: s.write_failures,
        }
    }
}

// ============================================================================
// Environment Types
// ============================================================================

#[derive(Debug, Clone, Copy, uniffi::Enum)]
pub enum FfiNetworkStatus {
    Unreachable,
    Wifi,
    Cellular,
}

impl From<FfiNetworkStatus> for NetworkStatus {
    fn from(s: FfiNetworkStatus) -> Self {
        match s {
            FfiNetworkStatus::Unreachable => NetworkStatus::Unreachable,
            FfiNetworkStatus::Wifi => NetworkStatus::Wifi,
            FfiNetworkStatus::Cellular => NetworkStatus::Cellular,
        }
    }
}

#[derive(Debug, Clone, Copy, uniffi::Enum)]
pub enum FfiThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl From<FfiThermalState> for ThermalState {
    fn from(s: FfiThermalState) -> Self {
        match s {
            FfiThermalState::Nominal => ThermalState::Nominal,
            FfiThermalState::Fair => ThermalState::Fair,
            FfiThermalState::Serious => ThermalState::Serious,
            FfiThermalState::Critical => ThermalState::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, uniffi::Enum)]
pub enum FfiAppState {
    Foreground,
    Background,
    BackgroundExpired,
}

impl From<FfiAppState> for AppState {
    fn from(s: FfiAppState) -> Self {
        match s {
            FfiAppState::Foreground => AppState::Foreground,
            FfiAppState::Background => AppState::Background,
            FfiAppState::BackgroundExpired => AppState::BackgroundExpired,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBatteryStatus {
    /// 0.0 to 1.0
    pub level: f32,
    pub charging: bool,
    pub low_power_mode: bool,
}

impl From<FfiBatteryStatus> for BatteryStatus {
    fn from(b: FfiBatteryStatus) -> Self {
        Self {
            level: b.level,
            charging: b.charging,
            low_power_mode: b.low_power_mode,
        }
    }
}

// ============================================================================
// Search Types
// ============================================================================

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiHighlightSpan {
    pub start: u32,
    pub end: u32,
}

impl From<HighlightSpan> for FfiHighlightSpan {
    fn from(h: HighlightSpan) -> Self {
        Self {
            start: h.start as u32,
            end: h.end as u32,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFieldHighlight {
    pub field: String,
    pub text: String,
    pub highlights: Vec<FfiHighlightSpan>,
}

impl From<FieldHighlight> for FfiFieldHighlight {
    fn from(f: FieldHighlight) -> Self {
        Self {
            field: f.field,
            text: f.text,
            highlights: f.highlights.into_iter().map(FfiHighlightSpan::from).collect(),
        }
    }
}

fn location_name(location: Location) -> &'static str {
    match location {
        Location::Inbox => "inbox",
        Location::Draft => "draft",
        Location::Sent => "sent",
        Location::Trash => "trash",
        Location::Spam => "spam",
        Location::Archive => "archive",
        Location::AllMail => "all-mail",
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSearchHit {
    pub message_id: String,
    /// Unix timestamp (seconds since epoch)
    pub time: i64,
    pub is_unread: bool,
    pub is_starred: bool,
    pub location: String,
    pub label_ids: Vec<String>,
    pub subject: String,
    pub sender: FfiContact,
    pub snippet: String,
    pub highlights: Vec<FfiFieldHighlight>,
    pub decryption_failed: bool,
}

impl From<SearchHit> for FfiSearchHit {
    fn from(h: SearchHit) -> Self {
        Self {
            message_id: h.message_id.0,
            time: h.time,
            is_unread: h.is_unread,
            is_starred: h.is_starred,
            location: location_name(h.location).to_string(),
            label_ids: h.label_ids,
            subject: h.subject,
            sender: h.sender.into(),
            snippet: h.snippet,
            highlights: h.highlights.into_iter().map(FfiFieldHighlight::from).collect(),
            decryption_failed: h.decryption_failed,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSearchPage {
    pub hits: Vec<FfiSearchHit>,
    pub is_complete: bool,
}

impl From<SearchPage> for FfiSearchPage {
    fn from(p: SearchPage) -> Self {
        Self {
            hits: p.hits.into_iter().map(FfiSearchHit::from).collect(),
            is_complete: p.is_complete,
        }
    }
}

// ============================================================================
// Host Callbacks
// ============================================================================

/// The user's remote mailbox, implemented by the host app
#[uniffi::export(callback_interface)]
pub trait FfiRemoteStore: Send + Sync {
    /// Messages strictly older than the `before_*` cursor, newest first.
    /// All three cursor fields are `None` for the first page.
    fn list_messages(
        &self,
        label_id: String,
        before_time: Option<i64>,
        before_order: Option<i64>,
        before_id: Option<String>,
        page_size: u32,
    ) -> Result<FfiMessagePage, SearchError>;

    fn get_message_detail(&self, message_id: String) -> Result<FfiMessageDetail, SearchError>;
}

/// OpenPGP keys and operations, implemented by the host app
#[uniffi::export(callback_interface)]
pub trait FfiCrypto: Send + Sync {
    fn candidate_keys(&self, address_id: String) -> Result<Vec<FfiAddressKey>, SearchError>;

    fn mailbox_passphrase(&self) -> Result<String, SearchError>;

    fn decrypt_with_token(
        &self,
        body: String,
        key: FfiAddressKey,
        token: String,
        passphrase: String,
    ) -> Result<String, SearchError>;

    fn decrypt_legacy(
        &self,
        body: String,
        key: FfiAddressKey,
        passphrase: String,
    ) -> Result<String, SearchError>;
}

// ============================================================================
// Log Callback
// ============================================================================

#[derive(Debug, Clone, Copy, uniffi::Enum)]
pub enum FfiLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<log::Level> for FfiLogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => FfiLogLevel::Error,
            log::Level::Warn => FfiLogLevel::Warn,
            log::Level::Info => FfiLogLevel::Info,
            log::Level::Debug => FfiLogLevel::Debug,
            log::Level::Trace => FfiLogLevel::Trace,
        }
    }
}

impl From<FfiLogLevel> for log::Level {
    fn from(level: FfiLogLevel) -> Self {
        match level {
            FfiLogLevel::Error => log::Level::Error,
            FfiLogLevel::Warn => log::Level::Warn,
            FfiLogLevel::Info => log::Level::Info,
            FfiLogLevel::Debug => log::Level::Debug,
            FfiLogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Receives log messages from Rust
///
/// Swift should implement this using os_log/Logger for unified logging.
#[uniffi::export(callback_interface)]
pub trait LogCallback: Send + Sync {
    /// `target` is the module path, e.g. "esearch::build"
    fn on_log(&self, level: FfiLogLevel, target: String, message: String);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PauseReason;

    #[test]
    fn test_status_conversion() {
        let status = IndexStatus {
            state: IndexState::LowStorage,
            processed_messages: 25,
            total_messages: 100,
            pause_reasons: vec![PauseReason::LowStorage, PauseReason::User],
            estimated_remaining: Some(Duration::from_millis(90_500)),
            write_failures: 0,
        };
        let ffi = FfiIndexStatus::from(status);

        assert_eq!(ffi.state, FfiIndexState::LowStorage);
        assert_eq!(ffi.pause_reasons, vec!["low-storage", "user"]);
        assert_eq!(ffi.estimated_remaining_secs, Some(90));
        assert!((ffi.progress - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_limit_crosses_back_as_remote_error() {
        let remote: RemoteError = SearchError::RateLimited {
            retry_after_secs: Some(7),
        }
        .into();
        assert_eq!(
            remote,
            RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );

        let other: RemoteError = SearchError::Fetch {
            message: "offline".into(),
        }
        .into();
        assert!(matches!(other, RemoteError::Transport(_)));
    }

    #[test]
    fn test_metadata_conversion() {
        let ffi = FfiMessageMetadata {
            id: "m1".into(),
            time: 1_700_000_000,
            order: 3,
            label_ids: vec!["0".into(), "10".into()],
            unread: true,
            subject: "Hello".into(),
            sender: FfiContact {
                name: Some("Alice".into()),
                address: "alice@example.com".into(),
            },
            to: vec![FfiContact {
                name: None,
                address: "bob@example.com".into(),
            }],
            cc: vec![],
            bcc: vec![],
            address_id: "addr".into(),
            num_attachments: 1,
        };
        let metadata = MessageMetadata::from(ffi);

        assert!(metadata.is_starred());
        assert_eq!(metadata.location(), Location::Inbox);
        assert_eq!(metadata.sender.display_name(), "Alice");
        assert_eq!(metadata.to[0].address, "bob@example.com");
    }
}
