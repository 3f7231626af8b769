//! Key derivation
//!
//! `derive_record_key`: PBKDF2-HMAC-SHA256, derives the 32-byte key used
//! to seal a single owner's records.  Deterministic by design: the same
//! `(owner_id, secondary_seed)` always yields the same key, so a record
//! encrypted in one session decrypts in any later session without any key
//! material ever being persisted or transmitted.
//!
//! Known weakness, preserved deliberately: with no secondary seed the key
//! is derived from the owner id alone, so anyone able to compute the id
//! can derive the key.  The iteration count slows brute force if the
//! derivation inputs leak, nothing more.  Do not paper over this by
//! inventing secret material here; callers that need a stronger scheme
//! must supply a `secondary_seed` from an independent source.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

pub const KDF_ROUNDS: u32 = 100_000;
pub const KEY_LEN: usize = 32;

/// Application-wide KDF salt.  Not secret; fixed so derivation stays
/// deterministic across installs and sessions.
const KDF_SALT: &[u8] = b"dosesafe-record-key-v1";

/// Separator between owner id and secondary seed in the KDF input.
/// Prevents `("ab", "c")` and `("a", "bc")` from colliding.
const SEED_SEPARATOR: u8 = 0x1f;

/// 32-byte symmetric record key.  Zeroized on drop; created at the start
/// of an encrypt/decrypt call and discarded when the call returns.
#[derive(ZeroizeOnDrop)]
pub struct RecordKey(pub [u8; KEY_LEN]);

/// Derive the record key for `owner_id`.
///
/// Pure and offline, no failure modes.
pub fn derive_record_key(owner_id: &str, secondary_seed: Option<&str>) -> RecordKey {
    let mut input = Vec::with_capacity(
        owner_id.len() + secondary_seed.map(|s| s.len() + 1).unwrap_or(0),
    );
    input.extend_from_slice(owner_id.as_bytes());
    if let Some(seed) = secondary_seed {
        input.push(SEED_SEPARATOR);
        input.extend_from_slice(seed.as_bytes());
    }

    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(&input, KDF_SALT, KDF_ROUNDS, &mut out);
    RecordKey(out)
}
