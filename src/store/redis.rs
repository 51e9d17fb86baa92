//! Redis-backed store
//!
//! Writes, deletes and key scans go to the primary. Reads try every replica
//! (and the primary) in random order, falling through to the next client on
//! errors but not on misses.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{ReputationStore, StoreError};
use crate::metrics;

/// Connection settings for `RedisStore`
#[derive(Debug, Clone)]
pub struct RedisOptions {
    /// Primary address, `host:port`
    pub addr: String,
    /// Read replica addresses
    pub replicas: Vec<String>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub dial_timeout: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            replicas: Vec::new(),
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(100),
            dial_timeout: Duration::from_millis(250),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[derive(Clone)]
pub struct RedisStore {
    primary: ConnectionManager,
    /// Replicas followed by the primary
    readers: Vec<ConnectionManager>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisStore {
    /// Connect to the primary and all replicas, verifying the primary with PING
    pub async fn connect(options: &RedisOptions) -> Result<Self, StoreError> {
        let primary = open(&options.addr, options.dial_timeout).await?;

        let mut readers = Vec::with_capacity(options.replicas.len() + 1);
        for replica in &options.replicas {
            // the primary is added below
            if replica == &options.addr {
                continue;
            }
            readers.push(open(replica, options.dial_timeout).await?);
        }
        readers.push(primary.clone());

        let store = Self {
            primary,
            readers,
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
        };
        store.ping().await?;

        info!(
            primary = %options.addr,
            readers = store.readers.len(),
            "Connected to redis"
        );
        Ok(store)
    }
}

async fn open(addr: &str, dial_timeout: Duration) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(format!("redis://{addr}/0"))?;
    with_timeout(dial_timeout, ConnectionManager::new(client)).await
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout),
    }
}

/// Run a store call and record its latency
async fn timed<T, F>(operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let start = Instant::now();
    let result = fut.await;
    metrics::record_store_operation(operation, result.is_ok(), start.elapsed());
    result
}

#[async_trait]
impl ReputationStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut order: Vec<&ConnectionManager> = self.readers.iter().collect();
        order.shuffle(&mut rand::thread_rng());

        timed("get", async {
            let mut last_error = StoreError::Backend("no read clients configured".to_string());
            for reader in order {
                let mut conn = reader.clone();
                match with_timeout(self.read_timeout, conn.get::<_, Option<Vec<u8>>>(key)).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        warn!(error = %e, "Redis read failed, trying next client");
                        last_error = e;
                    }
                }
            }
            Err(last_error)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.primary.clone();
        timed(
            "set",
            with_timeout(
                self.write_timeout,
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()),
            ),
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.primary.clone();
        timed("delete", with_timeout(self.write_timeout, conn.del::<_, ()>(key))).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.primary.clone();
        timed(
            "keys",
            with_timeout(self.read_timeout, conn.keys::<_, Vec<String>>("*")),
        )
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.primary.clone();
        let cmd = redis::cmd("PING");
        let _pong: String =
            timed("ping", with_timeout(self.read_timeout, cmd.query_async(&mut conn))).await?;
        Ok(())
    }
}
