use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Clock, KvStore};
use crate::error::Result;

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store. Expired entries are swept on every write.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn entry(&self, value: &str, ttl: Option<Duration>, now: DateTime<Utc>) -> Entry {
        Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.is_live(now));
        entries.insert(key.to_string(), self.entry(value, ttl, now));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.is_live(now));
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), self.entry(value, ttl, now));
        Ok(true)
    }

    async fn replace(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.is_live(now));
        Ok(entries
            .insert(key.to_string(), self.entry(value, ttl, now))
            .map(|e| e.value))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Ok(entries
            .remove(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
