//! Fakes shared by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{IndexError, Result};
use crate::models::{BuildSession, Contact, IndexCursor, IndexEntry, MessageId, labels};
use crate::remote::{
    MessageDetail, MessageMetadata, MessagePage, RemoteError, RemoteMessageStore,
};
use crate::store::{AppendOutcome, EntryBatch, InMemoryIndexStore, IndexStore};
use crate::transform::{AddressKey, DecryptError, KeyProvider, MessageDecrypter};

/// Bodies starting with this fail to decrypt
pub const UNREADABLE: &str = "UNREADABLE";

pub fn message(id: &str, time: i64, subject: &str, body: &str) -> MessageDetail {
    MessageDetail {
        metadata: MessageMetadata {
            id: MessageId::new(id),
            time,
            order: 0,
            label_ids: [labels::INBOX.to_string(), labels::ALL_MAIL.to_string()]
                .into_iter()
                .collect(),
            unread: true,
            subject: subject.into(),
            sender: Contact::with_name("Alice", "alice@example.com"),
            to: vec![Contact::new("bob@example.com")],
            cc: vec![],
            bcc: vec![],
            address_id: "addr-1".into(),
            num_attachments: 0,
        },
        body: body.into(),
        mime_type: "text/plain".into(),
    }
}

/// Remote mailbox held in memory, newest first
#[derive(Default)]
pub struct FakeRemote {
    messages: Mutex<Vec<MessageDetail>>,
    pub fail_listing: AtomicBool,
    pub fail_details: AtomicBool,
    pub detail_calls: AtomicUsize,
    detail_errors: Mutex<HashMap<MessageId, RemoteError>>,
}

impl FakeRemote {
    pub fn with_messages(messages: Vec<MessageDetail>) -> Self {
        let remote = Self::default();
        for m in messages {
            remote.add(m);
        }
        remote
    }

    /// `count` messages m1..mN, m1 newest
    pub fn numbered(count: usize) -> Self {
        Self::with_messages(
            (1..=count)
                .map(|i| {
                    message(
                        &format!("m{i}"),
                        10_000 - i as i64 * 10,
                        &format!("subject {i}"),
                        &format!("body of message {i}"),
                    )
                })
                .collect(),
        )
    }

    pub fn add(&self, detail: MessageDetail) {
        let mut messages = self.messages.lock().unwrap();
        messages.push(detail);
        messages.sort_by(|a, b| b.metadata.cursor().cmp(&a.metadata.cursor()));
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_listing.store(failing, Ordering::SeqCst);
    }

    /// Fail every detail request for `id` with `error`
    pub fn fail_detail(&self, id: &str, error: RemoteError) {
        self.detail_errors
            .lock()
            .unwrap()
            .insert(MessageId::new(id), error);
    }

    pub fn heal_detail(&self, id: &str) {
        self.detail_errors.lock().unwrap().remove(&MessageId::new(id));
    }
}

impl RemoteMessageStore for FakeRemote {
    fn list_messages(
        &self,
        _label_id: &str,
        before: Option<&IndexCursor>,
        page_size: usize,
    ) -> std::result::Result<MessagePage, RemoteError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection reset".into()));
        }
        let messages = self.messages.lock().unwrap();
        let page = messages
            .iter()
            .filter(|m| before.is_none_or(|b| m.metadata.cursor() < *b))
            .take(page_size)
            .map(|m| m.metadata.clone())
            .collect();
        Ok(MessagePage {
            messages: page,
            total: messages.len() as u64,
        })
    }

    fn get_message_detail(&self, id: &MessageId) -> std::result::Result<MessageDetail, RemoteError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_details.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                message: "unavailable".into(),
            });
        }
        if let Some(error) = self.detail_errors.lock().unwrap().get(id) {
            return Err(error.clone());
        }
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| &m.metadata.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::Status {
                status: 404,
                message: "not found".into(),
            })
    }
}

pub struct OneKey;

impl KeyProvider for OneKey {
    fn candidate_keys(&self, _address_id: &str) -> std::result::Result<Vec<AddressKey>, DecryptError> {
        Ok(vec![AddressKey {
            id: "k1".into(),
            armored_key: "KEY".into(),
            token: None,
        }])
    }

    fn mailbox_passphrase(&self) -> std::result::Result<String, DecryptError> {
        Ok("passphrase".into())
    }
}

/// An address whose key was rotated: "k1" is stale, "k2" is current
pub struct RotatedKeys;

impl KeyProvider for RotatedKeys {
    fn candidate_keys(&self, _address_id: &str) -> std::result::Result<Vec<AddressKey>, DecryptError> {
        Ok(["k1", "k2"]
            .into_iter()
            .map(|id| AddressKey {
                id: id.into(),
                armored_key: "KEY".into(),
                token: None,
            })
            .collect())
    }

    fn mailbox_passphrase(&self) -> std::result::Result<String, DecryptError> {
        Ok("passphrase".into())
    }
}

/// Plaintext bodies that only the named key opens
pub struct OnlyKey(pub &'static str);

impl MessageDecrypter for OnlyKey {
    fn decrypt_with_token(
        &self,
        body: &str,
        key: &AddressKey,
        _token: &str,
        passphrase: &str,
    ) -> std::result::Result<String, DecryptError> {
        self.decrypt_legacy(body, key, passphrase)
    }

    fn decrypt_legacy(
        &self,
        body: &str,
        key: &AddressKey,
        _passphrase: &str,
    ) -> std::result::Result<String, DecryptError> {
        if key.id == self.0 {
            Ok(body.to_string())
        } else {
            Err(DecryptError(format!("{} does not match", key.id)))
        }
    }
}

/// Treats bodies as plaintext unless they start with [`UNREADABLE`]
pub struct PlainDecrypter;

impl MessageDecrypter for PlainDecrypter {
    fn decrypt_with_token(
        &self,
        body: &str,
        key: &AddressKey,
        _token: &str,
        passphrase: &str,
    ) -> std::result::Result<String, DecryptError> {
        self.decrypt_legacy(body, key, passphrase)
    }

    fn decrypt_legacy(
        &self,
        body: &str,
        _key: &AddressKey,
        _passphrase: &str,
    ) -> std::result::Result<String, DecryptError> {
        if body.starts_with(UNREADABLE) {
            Err(DecryptError("no matching key".into()))
        } else {
            Ok(body.to_string())
        }
    }
}

/// In-memory store whose writes can be made to fail
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryIndexStore,
    pub fail_appends: AtomicBool,
    /// `delete_all` clears everything, then reports an error
    pub fail_after_delete: AtomicBool,
    /// `delete_all` fails before touching anything
    pub fail_delete: AtomicBool,
}

impl IndexStore for FlakyStore {
    fn append(&self, entry: &IndexEntry) -> Result<AppendOutcome> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(IndexError::StoreWriteFailed {
                message_id: entry.message_id.clone(),
                message: "disk I/O error".into(),
            });
        }
        self.inner.append(entry)
    }

    fn get(&self, id: &MessageId) -> Result<Option<IndexEntry>> {
        self.inner.get(id)
    }

    fn remove(&self, id: &MessageId) -> Result<bool> {
        self.inner.remove(id)
    }

    fn count(&self) -> Result<u64> {
        self.inner.count()
    }

    fn size_bytes(&self) -> Result<u64> {
        self.inner.size_bytes()
    }

    fn iterate_descending_by_time(
        &self,
        from: Option<&IndexCursor>,
        batch_size: usize,
    ) -> Result<EntryBatch> {
        self.inner.iterate_descending_by_time(from, batch_size)
    }

    fn oldest(&self) -> Result<Option<IndexCursor>> {
        self.inner.oldest()
    }

    fn shrink_to(&self, max_bytes: u64) -> Result<u64> {
        self.inner.shrink_to(max_bytes)
    }

    fn compact(&self) -> Result<()> {
        self.inner.compact()
    }

    fn delete_all(&self) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(IndexError::Storage("database is locked".into()));
        }
        self.inner.delete_all()?;
        if self.fail_after_delete.load(Ordering::SeqCst) {
            return Err(IndexError::Storage("vacuum failed".into()));
        }
        Ok(())
    }

    fn load_session(&self, user_id: &str) -> Result<Option<BuildSession>> {
        self.inner.load_session(user_id)
    }

    fn save_session(&self, session: &BuildSession) -> Result<()> {
        self.inner.save_session(session)
    }
}
