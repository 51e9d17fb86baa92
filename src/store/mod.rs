//! Key-Value Storage
//!
//! The scoring service persists serialized reputation entries through the
//! `ReputationStore` trait. Two backends are provided:
//!
//! - `RedisStore`: writes go to a primary, reads are spread over replicas
//! - `MemoryStore`: in-process map with TTLs, used by tests and local runs
//!
//! Timeouts surface as `StoreError::Timeout`; the store never retries.

mod memory;
mod redis;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
pub use self::redis::{RedisOptions, RedisStore};

/// Errors from the storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store operation timed out")]
    Timeout,
}

#[async_trait]
pub trait ReputationStore: Send + Sync {
    /// Fetch a raw value, `None` when the key is absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Remove a key; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Every live key in the store
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
