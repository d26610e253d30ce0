//! Error types for key management and persistence.

use thiserror::Error;

/// Result alias for key lifecycle operations.
pub type KeyResult<T> = Result<T, KeyStoreError>;

/// Result alias for persistence adapter operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the key ring, the lifecycle manager and key generation.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// A key with the same id is already held by the ring.
    ///
    /// Key id generation is expected to be unique, so this indicates a
    /// programming error rather than a transient condition.
    #[error("key id {0} is already present in the key ring")]
    DuplicateKeyId(String),

    /// The ring holds no unexpired key that could sign a token.
    #[error("no signing key available")]
    NoSigningKey,

    /// The key generator failed to produce a key pair.
    #[error("key generation failed: {0}")]
    Generation(String),

    /// An algorithm name outside the supported set.
    #[error("unsupported signing algorithm {0}")]
    UnsupportedAlgorithm(String),

    /// The configured key-encryption key is malformed.
    #[error("invalid key encryption key: {0}")]
    InvalidKeyEncryptionKey(String),

    /// Key material could not be sealed for storage or opened after loading.
    #[error("key material for {key_id} is unusable: {reason}")]
    Material { key_id: String, reason: String },

    /// The persistence adapter reported a failure.
    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// A blocking task (key generation) panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl KeyStoreError {
    pub(crate) fn material(key_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Material {
            key_id: key_id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors reported by persistence adapters.
///
/// Every variant is recoverable from the point of view of the rotation
/// scheduler: a failed save or purge is retried on the next tick.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be mapped back to key material.
    #[error("stored row for {key_id} is corrupt: {reason}")]
    Corrupt { key_id: String, reason: String },

    /// The backend cannot be reached.
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
