use chrono::Duration;
use std::sync::Arc;

use crate::error::{AppError, Result, SessionError};
use crate::models::EcPublicJwk;
use crate::store::KvStore;

const SESSION_KEY_PREFIX: &str = "dbsc-key";

/// Durable `sessionId -> publicKey` bindings.
///
/// A binding is written once by registration and never updated. It lives as
/// long as the session's credential link, or until [`SessionKeyRegistry::revoke`].
#[derive(Clone)]
pub struct SessionKeyRegistry {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SessionKeyRegistry {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Bind `session_id` to `key`. Re-binding the same key is a no-op; a different key is refused.
    pub async fn bind(&self, session_id: &str, key: &EcPublicJwk) -> Result<()> {
        let encoded = serde_json::to_string(key)
            .map_err(|_| AppError::Internal("Serialize public key failed".to_string()))?;

        if self.kv.set_if_absent(&Self::key(session_id), &encoded, Some(self.ttl)).await? {
            return Ok(());
        }

        match self.lookup(session_id).await? {
            Some(existing) if existing == *key => Ok(()),
            _ => Err(SessionError::KeyConflict.into()),
        }
    }

    pub async fn lookup(&self, session_id: &str) -> Result<Option<EcPublicJwk>> {
        let Some(raw) = self.kv.get(&Self::key(session_id)).await? else {
            return Ok(None);
        };
        let key = serde_json::from_str(&raw)
            .map_err(|_| AppError::Internal("Deserialize public key failed".to_string()))?;
        Ok(Some(key))
    }

    pub async fn revoke(&self, session_id: &str) -> Result<()> {
        self.kv.delete(&Self::key(session_id)).await
    }

    fn key(session_id: &str) -> String {
        format!("{}:{}", SESSION_KEY_PREFIX, session_id)
    }
}

/// Compares a freshly presented key with the one bound at registration.
#[derive(Clone)]
pub struct ContinuityChecker {
    registry: SessionKeyRegistry,
}

impl ContinuityChecker {
    pub fn new(registry: SessionKeyRegistry) -> Self {
        Self { registry }
    }

    /// Ok only when `session_id` is bound to exactly `presented`.
    pub async fn check(&self, session_id: &str, presented: &EcPublicJwk) -> Result<()> {
        match self.registry.lookup(session_id).await? {
            None => Err(SessionError::UnknownSession.into()),
            Some(stored) if stored == *presented => Ok(()),
            Some(_) => Err(SessionError::KeyMismatch.into()),
        }
    }
}
