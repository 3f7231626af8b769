use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Encryption failed: {0}")]
    Encryption(ds_crypto::CryptoError),

    #[error("Decryption failed: {0}")]
    Decryption(ds_crypto::CryptoError),

    #[error("Remote store unavailable: {0}")]
    Transport(String),

    #[error("Remote operation timed out")]
    Timeout,

    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Vault not initialized: call initialize() first")]
    NotInitialized,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Record not found: {0}")]
    NotFound(String),
}

impl VaultError {
    /// Transport failures (including timeouts) trigger cache fallback for
    /// reads and eventual reconciliation for writes; everything else is a
    /// hard failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, VaultError::Transport(_) | VaultError::Timeout)
    }
}
