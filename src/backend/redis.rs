//! Redis Backend Module
//!
//! Redis transport using a bounded deadpool connection pool. A connection is
//! checked out per operation and returned as soon as the reply arrives.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use deadpool_redis::redis::{self, RedisError};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use tracing::{debug, info, warn};

use super::{Backend, Command, KeyShape, Transaction, Ttl};
use crate::error::{KvError, Result};
use crate::scheme::StoreType;

/// Keys requested per SCAN round trip
const SCAN_COUNT: usize = 200;

/// WATCH/EXEC rounds before a contended commit gives up
const COMMIT_ATTEMPTS: usize = 3;

/// Longest expiry sent to the server; Redis rejects `EX` values whose
/// millisecond form overflows
const MAX_EXPIRE_SECS: u64 = (i64::MAX / 1000 / 2) as u64;

// == Redis Backend ==
/// Backend talking to a Redis server through a connection pool.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Creates a pool of at most `pool_size` connections to `url`.
    ///
    /// No connection is opened until the first operation.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(PoolConfig::new(pool_size));

        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        info!("Redis pool created for {} (max {} connections)", url, pool_size);
        Ok(Self::new(pool))
    }

    /// Wraps an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Current number of pooled connections, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(KvError::from)
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn family(&self) -> StoreType {
        StoreType::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Vec<Option<Vec<u8>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(seconds) = ttl {
            cmd.arg("EX").arg(seconds.min(MAX_EXPIRE_SECS));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let found: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(found)
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        let mut conn = self.conn().await?;
        let reply: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(Ttl::from_reply(reply))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let applied: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds.min(MAX_EXPIRE_SECS))
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut conn = self.conn().await?;
        let fields: BTreeMap<String, Vec<u8>> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(fields)
    }

    async fn commit(&self, tx: Transaction) -> Result<()> {
        if tx.is_empty() {
            return Ok(());
        }
        let first_key = tx.commands()[0].key().to_string();
        let staged = tx.len();
        let keys: Vec<String> = tx.keys().into_iter().map(str::to_string).collect();
        let pipe = build_pipeline(&tx);

        let mut conn = self.conn().await?;
        for attempt in 1..=COMMIT_ATTEMPTS {
            // EXEC only discards the queue for errors raised while queueing;
            // runtime errors such as WRONGTYPE would apply the other commands.
            // Check every key's type under WATCH so EXEC sees the same shapes.
            let _: () = redis::cmd("WATCH").arg(&keys).query_async(&mut conn).await?;
            let shapes = match key_shapes(&mut conn, &keys).await {
                Ok(shapes) => shapes,
                Err(e) => {
                    unwatch(&mut conn).await;
                    return Err(e);
                }
            };
            if let Err(e) = tx.validate(|key| shapes.get(key).copied().flatten()) {
                unwatch(&mut conn).await;
                warn!("Redis transaction for {} rejected: {}", first_key, e);
                return Err(e);
            }

            let result: std::result::Result<Option<()>, RedisError> = pipe.query_async(&mut conn).await;
            match result {
                Ok(Some(())) => {
                    debug!("Redis transaction committed {} commands", staged);
                    return Ok(());
                }
                Ok(None) => {
                    debug!(
                        "Redis transaction for {} raced a concurrent write (attempt {})",
                        first_key, attempt
                    );
                }
                Err(e) => {
                    warn!("Redis transaction for {} aborted: {}", first_key, e);
                    return Err(KvError::Transaction {
                        key: first_key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        warn!("Redis transaction for {} gave up after {} attempts", first_key, COMMIT_ATTEMPTS);
        Err(KvError::Transaction {
            key: first_key,
            reason: "watched keys kept changing".to_string(),
        })
    }

    async fn close(&self) {
        self.pool.close();
        info!("Redis pool closed");
    }
}

/// MULTI ... EXEC pipeline for the staged commands.
fn build_pipeline(tx: &Transaction) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for command in tx.commands() {
        match command {
            Command::Set { key, value, ttl } => {
                let cmd = pipe.cmd("SET").arg(key).arg(value);
                if let Some(seconds) = ttl {
                    cmd.arg("EX").arg((*seconds).min(MAX_EXPIRE_SECS));
                }
                cmd.ignore();
            }
            Command::HSet { key, fields } => {
                pipe.cmd("HSET").arg(key).arg(fields).ignore();
            }
            Command::Del { key } => {
                pipe.cmd("DEL").arg(key).ignore();
            }
        }
    }
    pipe
}

/// Current shape of every key, absent keys mapped to None.
async fn key_shapes(conn: &mut Connection, keys: &[String]) -> Result<HashMap<String, Option<KeyShape>>> {
    let mut pipe = redis::pipe();
    for key in keys {
        pipe.cmd("TYPE").arg(key);
    }
    let replies: Vec<String> = pipe.query_async(conn).await?;
    Ok(keys
        .iter()
        .cloned()
        .zip(replies.iter().map(|reply| KeyShape::from_type_reply(reply)))
        .collect())
}

async fn unwatch(conn: &mut Connection) {
    let result: std::result::Result<(), RedisError> = redis::cmd("UNWATCH").query_async(conn).await;
    if let Err(e) = result {
        warn!("UNWATCH failed: {}", e);
    }
}
