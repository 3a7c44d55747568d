use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use super::random_token;
use crate::error::Result;
use crate::store::{hashed_key, KvStore};

const FALLBACK_PREFIX: &str = "fallback-identity";
const FALLBACK_COOKIE_BYTES: usize = 32;

/// Looks up the credential payload behind an external handle.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, handle: &str) -> Result<Option<Vec<u8>>>;
}

/// Long-lived `fallback cookie -> user id` mapping written at password login.
///
/// It is what DBSC registration starts from, and what the browser keeps
/// using when it does not support bound sessions.
#[derive(Clone)]
pub struct FallbackIdentityStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl FallbackIdentityStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Mint a fallback cookie value for `user_id`
    pub async fn issue(&self, user_id: &str) -> Result<String> {
        let cookie_value = random_token(FALLBACK_COOKIE_BYTES);
        self.kv
            .set(&hashed_key(FALLBACK_PREFIX, &cookie_value), user_id, Some(self.ttl))
            .await?;
        Ok(cookie_value)
    }

    pub async fn forget(&self, cookie_value: &str) -> Result<()> {
        self.kv
            .delete(&hashed_key(FALLBACK_PREFIX, cookie_value))
            .await
    }
}

#[async_trait]
impl CredentialResolver for FallbackIdentityStore {
    async fn resolve(&self, handle: &str) -> Result<Option<Vec<u8>>> {
        if handle.is_empty() {
            return Ok(None);
        }
        let user_id = self.kv.get(&hashed_key(FALLBACK_PREFIX, handle)).await?;
        Ok(user_id.map(String::into_bytes))
    }
}
