//! Backend Module
//!
//! Transport contract against the network-addressed key-value service.
//!
//! # Implementations
//! - `RedisBackend`: pooled connections to a Redis server
//! - `MemoryBackend`: in-process map with the same semantics

mod memory;
mod redis;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::error::{KvError, Result};
use crate::scheme::StoreType;

// == Ttl ==
/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key does not exist
    Missing,
    /// Key exists without expiry
    Persistent,
    /// Key expires in this many seconds
    Seconds(u64),
}

impl Ttl {
    /// Maps the Redis TTL reply (-2 missing, -1 persistent).
    pub fn from_reply(reply: i64) -> Self {
        match reply {
            -2 => Ttl::Missing,
            r if r < 0 => Ttl::Persistent,
            r => Ttl::Seconds(r as u64),
        }
    }
}

// == Command ==
/// A write staged inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<u64>,
    },
    HSet {
        key: String,
        fields: Vec<(String, Vec<u8>)>,
    },
    Del {
        key: String,
    },
}

impl Command {
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. } | Command::HSet { key, .. } | Command::Del { key } => key,
        }
    }
}

// == Key Shape ==
/// Kind of value currently stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    String,
    Hash,
    /// Lists, sets and anything else this crate never writes
    Other,
}

impl KeyShape {
    /// Maps a Redis `TYPE` reply; `none` means the key is absent.
    pub fn from_type_reply(reply: &str) -> Option<Self> {
        match reply {
            "none" => None,
            "string" => Some(KeyShape::String),
            "hash" => Some(KeyShape::Hash),
            _ => Some(KeyShape::Other),
        }
    }
}

// == Transaction ==
/// Commands queued for one atomic commit. Dropping it discards everything staged.
#[derive(Debug, Default)]
pub struct Transaction {
    commands: Vec<Command>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>, ttl: Option<u64>) -> &mut Self {
        self.commands.push(Command::Set {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, Vec<u8>)>) -> &mut Self {
        self.commands.push(Command::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Del { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Distinct keys touched, in staging order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            if !keys.contains(&command.key()) {
                keys.push(command.key());
            }
        }
        keys
    }

    /// Replays the staged commands against the current key shapes and fails
    /// on the first one the server would reject at execution time.
    ///
    /// `current` maps a key to its live shape, absent keys to None. Backends
    /// call this before applying anything so a commit is all or nothing.
    pub fn validate<F>(&self, current: F) -> Result<()>
    where
        F: Fn(&str) -> Option<KeyShape>,
    {
        let mut staged: HashMap<&str, Option<KeyShape>> = HashMap::new();
        for command in &self.commands {
            let key = command.key();
            let shape = match staged.get(key) {
                Some(shape) => *shape,
                None => current(key),
            };
            let next = match command {
                Command::Set { ttl: Some(0), .. } => {
                    return Err(KvError::Transaction {
                        key: key.to_string(),
                        reason: "zero expiry".to_string(),
                    });
                }
                Command::Set { .. } => Some(KeyShape::String),
                Command::HSet { .. } => match shape {
                    None | Some(KeyShape::Hash) => Some(KeyShape::Hash),
                    Some(other) => {
                        return Err(KvError::Transaction {
                            key: key.to_string(),
                            reason: format!("hash write on a {:?} key", other),
                        });
                    }
                },
                Command::Del { .. } => None,
            };
            staged.insert(key, next);
        }
        Ok(())
    }
}

// == Backend ==
/// Operations consumed from the backing store.
///
/// Values are opaque byte strings. Hash values live under their own key and
/// are not visible to `get`/`get_many`.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Store family, checked against a scheme's `StoreType`.
    fn family(&self) -> StoreType;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Reads several string keys; hashes and missing keys come back as `None`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()>;

    /// Deletes keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<Ttl>;

    /// Sets a TTL on an existing key, false when the key is absent.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;

    /// Lists keys matching a glob pattern (`*`, `?`, `\` escapes).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Atomically increments an integer counter, creating it at 0.
    async fn incr(&self, key: &str) -> Result<i64>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>>;

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>>;

    /// Applies every staged command or none of them.
    async fn commit(&self, tx: Transaction) -> Result<()>;

    /// Releases pooled resources.
    async fn close(&self);
}

// == Glob Matching ==
/// Matches `text` against a Redis-style glob with `*`, `?` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() && p[pi + 1] == t[ti] => {
                    pi += 2;
                    ti += 1;
                    continue;
                }
                c if c != '\\' && c == t[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }
        // Backtrack to the last star, letting it swallow one more char
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}
