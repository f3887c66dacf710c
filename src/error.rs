//! Error types for the store and cache
//!
//! Provides unified error handling using thiserror.

use deadpool_redis::redis::RedisError;
use deadpool_redis::{CreatePoolError, PoolError};
use thiserror::Error;

// == KV Error Enum ==
/// Unified error type for the store, the cipher and the in-process cache.
///
/// A missing key is not an error for store reads (they return `Option`);
/// `NotFound` is only produced by explicit cache removal.
#[derive(Error, Debug)]
pub enum KvError {
    /// Transport error from the backing store, surfaced verbatim
    #[error("Connection error: {0}")]
    Connection(#[from] RedisError),

    /// Pool exhausted or could not be created
    #[error("Pool error: {0}")]
    Pool(String),

    /// Envelope or record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Ciphertext is too short or otherwise malformed
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Authentication failed while opening ciphertext
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Sealing plaintext failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Key derivation or raw key validation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Stored value type does not match what the caller asked for
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Scheme could not be applied to the record
    #[error("Scheme error: {0}")]
    Scheme(String),

    /// Transaction staging or commit failed, nothing was committed
    #[error("Transaction aborted for {key}: {reason}")]
    Transaction { key: String, reason: String },

    /// Write targets a name the store keeps for its own counters
    #[error("Reserved key: {0}")]
    ReservedKey(String),

    /// Backend value holds another shape than the operation expects
    #[error("Wrong type for key: {0}")]
    WrongType(String),

    /// Key not present
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Deadline elapsed before the read completed
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Cache has no producer for a miss
    #[error("No producer configured for key: {0}")]
    NoProducer(String),
}

impl KvError {
    /// Wraps a malformed-data error with the operation and key it happened on.
    pub fn in_context(self, op: &str, key: &str) -> Self {
        match self {
            KvError::Serialization(msg) => {
                KvError::Serialization(format!("{op} {key}: {msg}"))
            }
            KvError::InvalidCiphertext(msg) => {
                KvError::InvalidCiphertext(format!("{op} {key}: {msg}"))
            }
            KvError::Decryption(msg) => KvError::Decryption(format!("{op} {key}: {msg}")),
            KvError::TypeMismatch(msg) => KvError::TypeMismatch(format!("{op} {key}: {msg}")),
            other => other,
        }
    }
}

impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        KvError::Serialization(err.to_string())
    }
}

impl From<PoolError> for KvError {
    fn from(err: PoolError) -> Self {
        KvError::Pool(err.to_string())
    }
}

impl From<CreatePoolError> for KvError {
    fn from(err: CreatePoolError) -> Self {
        KvError::Pool(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the crate.
pub type Result<T> = std::result::Result<T, KvError>;
