//! ds_crypto: Cryptographic primitives for the DoseSafe vault
//!
//! # Scheme
//! - Records are sealed with XChaCha20-Poly1305 (AEAD, random 24-byte nonce).
//! - The per-owner key is derived on demand from the owner id via
//!   PBKDF2-HMAC-SHA256 (100k rounds) and discarded after each call.
//! - Ciphertext blobs are base64-encoded so they can live in a document
//!   store that only carries text fields.

pub mod aead;
pub mod error;
pub mod kdf;

pub use aead::{open, seal};
pub use error::CryptoError;
pub use kdf::{derive_record_key, RecordKey};
