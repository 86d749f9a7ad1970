//! Message content transformation
//!
//! Decrypts a fetched message body with the user's address keys, strips
//! MIME and HTML structure, and produces the plaintext [`ContentRecord`]
//! that gets sealed into the index.

mod html;
mod mime;

pub use html::{escape_html, html_to_text, plain_to_html};
pub use mime::renderable_html;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use crate::error::IndexError;
use crate::models::ContentRecord;
use crate::remote::MessageDetail;

/// Failure reported by the key or decryption collaborator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct DecryptError(pub String);

/// One private key of a user address
#[derive(Clone, PartialEq)]
pub struct AddressKey {
    pub id: String,
    pub armored_key: String,
    /// Passphrase token wrapped for the user key (new key schema)
    pub token: Option<String>,
}

impl fmt::Debug for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressKey")
            .field("id", &self.id)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

/// Supplies candidate keys and the mailbox passphrase on demand.
/// Nothing returned here is persisted.
pub trait KeyProvider: Send + Sync {
    /// Keys of the address a message was delivered to, preferred first
    fn candidate_keys(&self, address_id: &str) -> Result<Vec<AddressKey>, DecryptError>;

    fn mailbox_passphrase(&self) -> Result<String, DecryptError>;
}

/// OpenPGP operations on armored message bodies
pub trait MessageDecrypter: Send + Sync {
    /// New key schema: unwrap the address key passphrase from `token`
    /// with the user key, then decrypt
    fn decrypt_with_token(
        &self,
        body: &str,
        key: &AddressKey,
        token: &str,
        passphrase: &str,
    ) -> Result<String, DecryptError>;

    /// Legacy schema: the mailbox passphrase unlocks the address key directly
    fn decrypt_legacy(
        &self,
        body: &str,
        key: &AddressKey,
        passphrase: &str,
    ) -> Result<String, DecryptError>;
}

/// Output of one transformation
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedMessage {
    pub record: ContentRecord,
    /// Every candidate key failed; the body is empty
    pub decryption_failed: bool,
}

pub struct ContentTransformer {
    keys: Arc<dyn KeyProvider>,
    decrypter: Arc<dyn MessageDecrypter>,
    // Candidate keys per address, held only while a build runs
    key_cache: RwLock<HashMap<String, Arc<Vec<AddressKey>>>>,
}

impl ContentTransformer {
    pub fn new(keys: Arc<dyn KeyProvider>, decrypter: Arc<dyn MessageDecrypter>) -> Self {
        Self {
            keys,
            decrypter,
            key_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build the content record for one message. Decryption failure is
    /// recorded in the result, never returned as an error.
    pub fn transform(&self, detail: &MessageDetail) -> TransformedMessage {
        let metadata = &detail.metadata;
        let mut record = ContentRecord {
            subject: metadata.subject.clone(),
            sender: metadata.sender.clone(),
            to: metadata.to.clone(),
            cc: metadata.cc.clone(),
            bcc: metadata.bcc.clone(),
            body: String::new(),
        };

        match self.decrypt_body(detail) {
            Ok(plaintext) => {
                let html = renderable_html(&plaintext, &detail.mime_type);
                record.body = html_to_text(&html);
                TransformedMessage {
                    record,
                    decryption_failed: false,
                }
            }
            Err(e) => {
                warn!("{}", e);
                TransformedMessage {
                    record,
                    decryption_failed: true,
                }
            }
        }
    }

    /// Forget cached candidate keys
    pub fn clear_key_cache(&self) {
        if let Ok(mut cache) = self.key_cache.write() {
            cache.clear();
        }
    }

    fn decrypt_body(&self, detail: &MessageDetail) -> Result<String, IndexError> {
        let id = &detail.metadata.id;
        let failed = || IndexError::DecryptionFailed(id.clone());
        let passphrase = self.keys.mailbox_passphrase().map_err(|e| {
            warn!("Mailbox passphrase unavailable for {id}: {e}");
            failed()
        })?;
        let keys = self
            .candidate_keys(&detail.metadata.address_id)
            .map_err(|e| {
                warn!("Candidate keys unavailable for {id}: {e}");
                failed()
            })?;

        for key in keys.iter() {
            if let Some(token) = &key.token {
                match self
                    .decrypter
                    .decrypt_with_token(&detail.body, key, token, &passphrase)
                {
                    Ok(body) => return Ok(body),
                    Err(e) => debug!("Token-wrapped key {} failed for {id}: {e}", key.id),
                }
            }
            match self.decrypter.decrypt_legacy(&detail.body, key, &passphrase) {
                Ok(body) => return Ok(body),
                Err(e) => debug!("Legacy key {} failed for {id}: {e}", key.id),
            }
        }
        Err(failed())
    }

    fn candidate_keys(&self, address_id: &str) -> Result<Arc<Vec<AddressKey>>, DecryptError> {
        if let Some(keys) = self
            .key_cache
            .read()
            .ok()
            .and_then(|cache| cache.get(address_id).cloned())
        {
            return Ok(keys);
        }

        let keys = Arc::new(self.keys.candidate_keys(address_id)?);
        if let Ok(mut cache) = self.key_cache.write() {
            cache.insert(address_id.to_string(), keys.clone());
        }
        Ok(keys)
    }
}
