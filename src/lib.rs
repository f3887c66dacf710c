//! sealkv - Encrypted, scheme-driven key-value persistence
//!
//! Stores typed values in a remote key-value service behind a tagged
//! envelope and optional AES-GCM encryption, with scheme-managed primary keys
//! and secondary indexes. An in-process get-or-compute cache with
//! frequency/recency eviction sits alongside for hot data.

pub mod backend;
pub mod cache;
pub mod cipher;
pub mod config;
pub mod envelope;
pub mod error;
pub mod scheme;
pub mod store;
pub mod tasks;

pub use backend::{Backend, MemoryBackend, RedisBackend, Transaction};
pub use cache::{Cache, CacheStats};
pub use cipher::{AesGcmCipher, Cipher};
pub use config::{CacheConfig, StoreConfig};
pub use envelope::{Codec, Envelope, JsonCodec, Value, ValueType};
pub use error::{KvError, Result};
pub use scheme::{Index, PrimaryKeyType, RecordLayout, Scheme, StoreType};
pub use store::{RecordKey, Store};
pub use tasks::spawn_optimize_task;
