//! Authenticated Encryption with Associated Data
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce).
//! Key size: 32 bytes.  Nonce: 24 bytes (random).  Tag: 16 bytes.
//!
//! Blob format (before base64): [ nonce (24 bytes) | ciphertext + tag ]
//!
//! Blobs are returned base64-encoded (URL-safe, no padding) because the
//! remote store is a document store and only persists text fields.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::RecordKey;

const NONCE_LEN: usize = 24;

/// Encrypt `plaintext` with the given record key, prepending a random
/// 24-byte nonce and base64-encoding the result.
/// `aad`: additional associated data (authenticated but not encrypted).
pub fn seal(key: &RecordKey, plaintext: &[u8], aad: &[u8]) -> Result<String, CryptoError> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(&key.0).map_err(|_| CryptoError::AeadEncrypt)?;

    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            chacha20poly1305::aead::Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Decrypt a base64 blob produced by [`seal`].
///
/// Fails closed: truncated input, bad encoding, and tag mismatch all
/// return an error, never partially-decrypted data.
pub fn open(key: &RecordKey, blob: &str, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let data = URL_SAFE_NO_PAD.decode(blob)?;
    if data.len() < NONCE_LEN {
        return Err(CryptoError::MalformedBlob(format!(
            "blob too short: {} bytes",
            data.len()
        )));
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    let nonce = chacha20poly1305::XNonce::from_slice(nonce_bytes);

    let cipher =
        XChaCha20Poly1305::new_from_slice(&key.0).map_err(|_| CryptoError::AeadDecrypt)?;

    let plaintext = cipher
        .decrypt(
            nonce,
            chacha20poly1305::aead::Payload { msg: ct, aad },
        )
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(Zeroizing::new(plaintext))
}
