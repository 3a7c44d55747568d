use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Duration;
use std::sync::Arc;

use super::random_token;
use crate::error::{AppError, Result};
use crate::store::{hashed_key, KvStore};

const COOKIE_PREFIX: &str = "dbsc-cookie";
const CURRENT_COOKIE_PREFIX: &str = "dbsc-current-cookie";
const CREDENTIAL_PREFIX: &str = "dbsc-credential";
const AUTHORIZATION_PREFIX: &str = "dbsc-authorization";
const AUTHORIZATION_BYTES: usize = 24;

/// The `cookie -> sessionId -> credential` chain.
///
/// The cookie hop lives seconds and is replaced on every refresh; the
/// credential hop lives for the whole session. A `sessionId -> current cookie`
/// pointer lets a rotation delete the previous binding.
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
    cookie_ttl: Duration,
    credential_ttl: Duration,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KvStore>, cookie_ttl: Duration, credential_ttl: Duration) -> Self {
        Self {
            kv,
            cookie_ttl,
            credential_ttl,
        }
    }

    /// Make `cookie_value` the only live cookie for `session_id`.
    ///
    /// The pointer swap is a single `replace`, so each superseded binding is
    /// handed to exactly one caller, which deletes it. Concurrent rotations of
    /// one session end with a single live cookie.
    pub async fn bind_cookie(&self, cookie_value: &str, session_id: &str) -> Result<()> {
        let binding = hashed_key(COOKIE_PREFIX, cookie_value);
        self.kv
            .set(&binding, session_id, Some(self.cookie_ttl))
            .await?;

        let pointer = Self::current_cookie_key(session_id);
        if let Some(previous) = self
            .kv
            .replace(&pointer, &binding, Some(self.credential_ttl))
            .await?
        {
            if previous != binding {
                self.kv.delete(&previous).await?;
            }
        }
        Ok(())
    }

    pub async fn session_for_cookie(&self, cookie_value: &str) -> Result<Option<String>> {
        self.kv.get(&hashed_key(COOKIE_PREFIX, cookie_value)).await
    }

    pub async fn store_credential(&self, session_id: &str, payload: &[u8]) -> Result<()> {
        self.kv
            .set(
                &Self::credential_key(session_id),
                &STANDARD.encode(payload),
                Some(self.credential_ttl),
            )
            .await
    }

    pub async fn credential(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        match self.kv.get(&Self::credential_key(session_id)).await? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stage a payload for pickup by the next registration; the handle works once.
    pub async fn stage_authorization(&self, payload: &[u8], ttl: Duration) -> Result<String> {
        let handle = random_token(AUTHORIZATION_BYTES);
        self.kv
            .set(
                &Self::authorization_key(&handle),
                &STANDARD.encode(payload),
                Some(ttl),
            )
            .await?;
        Ok(handle)
    }

    pub async fn redeem_authorization(&self, handle: &str) -> Result<Option<Vec<u8>>> {
        match self.kv.take(&Self::authorization_key(handle)).await? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Drop the credential and the live cookie binding for `session_id`.
    pub async fn revoke(&self, session_id: &str) -> Result<()> {
        if let Some(binding) = self.kv.take(&Self::current_cookie_key(session_id)).await? {
            self.kv.delete(&binding).await?;
        }
        self.kv.delete(&Self::credential_key(session_id)).await
    }

    fn decode(raw: &str) -> Result<Vec<u8>> {
        STANDARD
            .decode(raw)
            .map_err(|_| AppError::Internal("Corrupt credential payload".to_string()))
    }

    fn credential_key(session_id: &str) -> String {
        format!("{}:{}", CREDENTIAL_PREFIX, session_id)
    }

    fn current_cookie_key(session_id: &str) -> String {
        format!("{}:{}", CURRENT_COOKIE_PREFIX, session_id)
    }

    fn authorization_key(handle: &str) -> String {
        format!("{}:{}", AUTHORIZATION_PREFIX, handle)
    }
}
