pub mod clock;
pub mod memory;
pub mod sqlite;

pub use clock::*;
pub use memory::*;
pub use sqlite::*;

use async_trait::async_trait;
use chrono::Duration;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::StoreBackend;
use crate::db::Database;
use crate::error::Result;

/// Key-value store with per-entry expiry.
///
/// Every single-key operation is atomic. Expired entries behave exactly like
/// missing ones; when they are physically removed is up to the backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Insert or replace `key`. `ttl = None` keeps the entry until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Insert only if no live entry exists for `key`. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Insert or replace `key` and return the live value it held, in one atomic step.
    async fn replace(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Option<String>>;

    /// Read a live entry
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read and remove a live entry in one step. Two concurrent calls never both see the value.
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// Remove an entry, live or not
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get the backend name
    fn backend_name(&self) -> &'static str;
}

/// Build the configured backend
pub fn build_store(
    backend: StoreBackend,
    db: &Database,
    clock: Arc<dyn Clock>,
) -> Arc<dyn KvStore> {
    match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(clock)),
        StoreBackend::Sqlite => Arc::new(SqliteStore::new(db.clone(), clock)),
    }
}

/// Key for secrets handed to the client (cookie values); the raw value is never stored.
pub fn hashed_key(prefix: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{}:{}", prefix, hex::encode(hasher.finalize()))
}
