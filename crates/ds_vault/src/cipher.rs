//! Crypto capability seam.
//!
//! The orchestrator never touches key material directly: it asks a
//! [`CryptoProvider`] to transform a payload for an owner.  The concrete
//! implementation derives the per-owner key inside each call and discards
//! it when the call returns; keys are never cached or persisted.

use ds_crypto::{aead, kdf};

use crate::error::VaultError;

/// Domain separation for record payloads; authenticated but not encrypted.
const RECORD_AAD: &[u8] = b"ds-vault-record-v1";

pub trait CryptoProvider: Send + Sync {
    fn encrypt_payload(&self, owner_id: &str, plaintext: &[u8]) -> Result<String, VaultError>;
    fn decrypt_payload(&self, owner_id: &str, blob: &str) -> Result<Vec<u8>, VaultError>;
}

/// AEAD-backed provider using the deterministic per-owner record key.
pub struct RecordCipher {
    secondary_seed: Option<String>,
}

impl RecordCipher {
    pub fn new(secondary_seed: Option<String>) -> Self {
        Self { secondary_seed }
    }
}

impl CryptoProvider for RecordCipher {
    fn encrypt_payload(&self, owner_id: &str, plaintext: &[u8]) -> Result<String, VaultError> {
        let key = kdf::derive_record_key(owner_id, self.secondary_seed.as_deref());
        aead::seal(&key, plaintext, RECORD_AAD).map_err(VaultError::Encryption)
    }

    fn decrypt_payload(&self, owner_id: &str, blob: &str) -> Result<Vec<u8>, VaultError> {
        let key = kdf::derive_record_key(owner_id, self.secondary_seed.as_deref());
        aead::open(&key, blob, RECORD_AAD)
            .map(|plaintext| plaintext.to_vec())
            .map_err(VaultError::Decryption)
    }
}
