//! Index key management and at-rest encryption

mod cipher;
mod key_vault;

pub use cipher::{Cipher, NONCE_LEN, SealedRecord, decrypt, encrypt};
pub use key_vault::{
    IndexKey, KEY_LEN, KEYRING_SERVICE, KeyVault, KeyringSecretStore, MemorySecretStore,
    SecretStore,
};
