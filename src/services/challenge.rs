use chrono::Duration;
use std::sync::Arc;

use super::random_token;
use crate::error::Result;
use crate::store::KvStore;

const CHALLENGE_PREFIX: &str = "dbsc-challenge";

/// 256 bits
const CHALLENGE_BYTES: usize = 32;

/// What a challenge may be redeemed for.
///
/// Registration challenges are only handed out behind the fallback identity;
/// refresh challenges are handed to anyone naming a session id, so the two
/// must never be interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePurpose<'a> {
    Registration,
    Refresh { session_id: &'a str },
}

/// Outstanding anti-replay challenges. Each one can be consumed once, for the purpose it was issued for.
#[derive(Clone)]
pub struct ChallengeStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Mint and record a fresh challenge
    pub async fn issue(&self, purpose: ChallengePurpose<'_>) -> Result<String> {
        let challenge = random_token(CHALLENGE_BYTES);
        self.kv
            .set(&Self::key(purpose, &challenge), "1", Some(self.ttl))
            .await?;
        Ok(challenge)
    }

    /// True iff the challenge was live, unused and issued for `purpose`; it is removed in the same step.
    pub async fn consume(&self, purpose: ChallengePurpose<'_>, challenge: &str) -> Result<bool> {
        if challenge.is_empty() {
            return Ok(false);
        }
        Ok(self.kv.take(&Self::key(purpose, challenge)).await?.is_some())
    }

    fn key(purpose: ChallengePurpose<'_>, challenge: &str) -> String {
        match purpose {
            ChallengePurpose::Registration => {
                format!("{}:register:{}", CHALLENGE_PREFIX, challenge)
            }
            ChallengePurpose::Refresh { session_id } => {
                format!("{}:refresh:{}:{}", CHALLENGE_PREFIX, session_id, challenge)
            }
        }
    }
}
