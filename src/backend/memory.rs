//! Memory Backend Module
//!
//! In-process backend with Redis semantics: lazy TTL expiry, glob scans,
//! hashes, counters and validate-then-apply transactions.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{glob_match, Backend, Command, KeyShape, Transaction, Ttl};
use crate::cache::current_timestamp_ms;
use crate::error::{KvError, Result};
use crate::scheme::StoreType;

// == Slot ==
/// Stored value with its expiry.
#[derive(Debug, Clone)]
struct Slot {
    data: Data,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    expires_at: Option<u64>,
}

#[derive(Debug, Clone)]
enum Data {
    Str(Vec<u8>),
    Hash(BTreeMap<String, Vec<u8>>),
}

/// Absolute expiry for a TTL, clamped at the far end of the clock.
fn expiry_after(seconds: u64) -> u64 {
    current_timestamp_ms().saturating_add(seconds.saturating_mul(1000))
}

impl Slot {
    fn new(data: Data, ttl_seconds: Option<u64>) -> Self {
        Self {
            data,
            expires_at: ttl_seconds.map(expiry_after),
        }
    }

    /// Expired once the current time reaches the expiration time.
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }

    fn ttl(&self) -> Ttl {
        match self.expires_at {
            Some(expires) => {
                let remaining_ms = expires.saturating_sub(current_timestamp_ms());
                // Round up like Redis so a fresh 10s key reports 10
                Ttl::Seconds(remaining_ms.div_ceil(1000))
            }
            None => Ttl::Persistent,
        }
    }
}

// == Memory Backend ==
/// Backend keeping everything in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Slot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live keys.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|slot| !slot.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes all expired keys, returning how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, slot| !slot.is_expired());
        before - entries.len()
    }
}

fn live<'a>(entries: &'a HashMap<String, Slot>, key: &str) -> Option<&'a Slot> {
    entries.get(key).filter(|slot| !slot.is_expired())
}

#[async_trait]
impl Backend for MemoryBackend {
    fn family(&self) -> StoreType {
        StoreType::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        match live(&entries, key).map(|slot| &slot.data) {
            Some(Data::Str(value)) => Ok(Some(value.clone())),
            Some(Data::Hash(_)) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|key| match live(&entries, key).map(|slot| &slot.data) {
                Some(Data::Str(value)) => Some(value.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Slot::new(Data::Str(value), ttl));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if let Some(slot) = entries.remove(key) {
                if !slot.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.read().await;
        Ok(live(&entries, key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        let entries = self.entries.read().await;
        Ok(live(&entries, key).map(Slot::ttl).unwrap_or(Ttl::Missing))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key).filter(|slot| !slot.is_expired()) {
            Some(slot) => {
                slot.expires_at = Some(expiry_after(seconds));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, slot)| !slot.is_expired() && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.write().await;
        let (current, expires_at) = match entries.get(key).filter(|slot| !slot.is_expired()) {
            Some(Slot {
                data: Data::Str(raw),
                expires_at,
            }) => {
                let current = std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| KvError::WrongType(format!("{} is not an integer", key)))?;
                (current, *expires_at)
            }
            Some(_) => return Err(KvError::WrongType(key.to_string())),
            None => (0, None),
        };

        let next = current
            .checked_add(1)
            .ok_or_else(|| KvError::WrongType(format!("{} would overflow", key)))?;
        entries.insert(
            key.to_string(),
            Slot {
                data: Data::Str(next.to_string().into_bytes()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        match live(&entries, key).map(|slot| &slot.data) {
            Some(Data::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(Data::Str(_)) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let entries = self.entries.read().await;
        match live(&entries, key).map(|slot| &slot.data) {
            Some(Data::Hash(fields)) => Ok(fields.clone()),
            Some(Data::Str(_)) => Err(KvError::WrongType(key.to_string())),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn commit(&self, tx: Transaction) -> Result<()> {
        let mut entries = self.entries.write().await;

        // Validate against the live map first so a failing command leaves nothing applied
        tx.validate(|key| {
            live(&entries, key).map(|slot| match slot.data {
                Data::Str(_) => KeyShape::String,
                Data::Hash(_) => KeyShape::Hash,
            })
        })?;

        let staged = tx.len();
        for command in tx.into_commands() {
            match command {
                Command::Set { key, value, ttl } => {
                    entries.insert(key, Slot::new(Data::Str(value), ttl));
                }
                Command::HSet { key, fields } => {
                    let slot = entries
                        .entry(key)
                        .and_modify(|slot| {
                            if slot.is_expired() {
                                *slot = Slot::new(Data::Hash(BTreeMap::new()), None);
                            }
                        })
                        .or_insert_with(|| Slot::new(Data::Hash(BTreeMap::new()), None));
                    if let Data::Hash(map) = &mut slot.data {
                        map.extend(fields);
                    }
                }
                Command::Del { key } => {
                    entries.remove(&key);
                }
            }
        }

        debug!("Memory backend committed {} commands", staged);
        Ok(())
    }

    async fn close(&self) {
        self.entries.write().await.clear();
    }
}
