//! DBSC session lifecycle: start, register, refresh, lookup and revocation.
//!
//! ```text
//! start ──► challenge issued ──► register ──► active ──► (cookie expires)
//!                                               ▲              │
//!                                               └── refresh ◄──┘  (token-less call first
//!                                                                   yields a new challenge)
//! ```
//!
//! Every rejection surfaces as [`SessionError`]; handlers turn all of them
//! into an identical 401.

use std::sync::Arc;

use super::{
    random_token, BoundCookie, ChallengePurpose, ChallengeStore, ContinuityChecker, CredentialResolver,
    CredentialStore, SessionKeyRegistry, SignatureVerifier,
};
use crate::config::{Config, DbscConfig};
use crate::error::{AppError, Result, SessionError};
use crate::models::{
    RefreshOutcome, SessionCredential, SessionGrant, SessionInstructions, SessionScope,
    VerifiedSession,
};
use crate::store::KvStore;

pub const REGISTRATION_HEADER: &str = "Sec-Session-Registration";
pub const RESPONSE_HEADER: &str = "Sec-Session-Response";
pub const SESSION_ID_HEADER: &str = "Sec-Session-Id";
pub const CHALLENGE_HEADER: &str = "Sec-Session-Challenge";

const SESSION_ID_BYTES: usize = 24;
const COOKIE_VALUE_BYTES: usize = 32;
const MAX_SESSION_ID_LEN: usize = 128;

pub struct DbscService {
    challenges: ChallengeStore,
    registry: SessionKeyRegistry,
    continuity: ContinuityChecker,
    credentials: CredentialStore,
    resolver: Arc<dyn CredentialResolver>,
    cookie: BoundCookie,
    settings: DbscConfig,
}

impl DbscService {
    pub fn new(kv: Arc<dyn KvStore>, resolver: Arc<dyn CredentialResolver>, config: &Config) -> Self {
        let settings = config.dbsc.clone();
        let registry = SessionKeyRegistry::new(kv.clone(), settings.credential_ttl());
        Self {
            challenges: ChallengeStore::new(kv.clone(), settings.challenge_ttl()),
            continuity: ContinuityChecker::new(registry.clone()),
            registry,
            credentials: CredentialStore::new(
                kv,
                settings.cookie_binding_ttl(),
                settings.credential_ttl(),
            ),
            resolver,
            cookie: BoundCookie::from_config(&config.cookie),
            settings,
        }
    }

    pub fn cookie(&self) -> &BoundCookie {
        &self.cookie
    }

    /// Begin registration for the holder of `fallback_cookie`.
    ///
    /// Returns the `Sec-Session-Registration` header value.
    pub async fn start(&self, fallback_cookie: Option<&str>) -> Result<String> {
        let fallback = fallback_cookie
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

        let challenge = self.challenges.issue(ChallengePurpose::Registration).await?;
        let mut header = format!(
            "({});path=\"{}\";challenge=\"{}\"",
            self.settings.algorithms.join(" "),
            self.settings.registration_path,
            challenge
        );

        if let Some(payload) = self.resolver.resolve(fallback).await? {
            let handle = self
                .credentials
                .stage_authorization(&payload, self.settings.challenge_ttl())
                .await?;
            header.push_str(&format!(";authorization=\"{}\"", handle));
        }

        tracing::debug!("Issued DBSC registration challenge");
        Ok(header)
    }

    /// Verify the registration proof and bind a new session to its key.
    pub async fn register(
        &self,
        token: Option<&str>,
        fallback_cookie: Option<&str>,
    ) -> Result<SessionGrant> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::MissingHeader(RESPONSE_HEADER))?;
        let proof = SignatureVerifier::verify(token)?;
        self.consume_challenge(ChallengePurpose::Registration, proof.challenge.as_deref())
            .await?;

        // Resolve the credential before minting anything so a failure leaves no orphaned binding.
        let mut credential = None;
        if let Some(handle) = proof.authorization.as_deref() {
            credential = self.credentials.redeem_authorization(handle).await?;
        }
        if credential.is_none() {
            if let Some(fallback) = fallback_cookie.filter(|v| !v.is_empty()) {
                credential = self.resolver.resolve(fallback).await?;
            }
        }
        let credential = credential.ok_or(SessionError::MissingCredential)?;

        let session_id = random_token(SESSION_ID_BYTES);
        self.registry.bind(&session_id, &proof.key).await?;
        self.credentials
            .store_credential(&session_id, &credential)
            .await?;

        let grant = self.grant(&session_id).await?;
        tracing::info!("Registered DBSC session {}", session_id);
        Ok(grant)
    }

    /// One refresh round. Without a token this only issues a challenge.
    pub async fn refresh(
        &self,
        session_id: Option<&str>,
        token: Option<&str>,
    ) -> Result<RefreshOutcome> {
        let session_id = session_id
            .filter(|s| !s.is_empty())
            .ok_or(SessionError::MissingHeader(SESSION_ID_HEADER))?;
        if !Self::is_well_formed_session_id(session_id) {
            return Err(SessionError::UnknownSession.into());
        }

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            let challenge = self
                .challenges
                .issue(ChallengePurpose::Refresh { session_id })
                .await?;
            tracing::debug!("Issued refresh challenge for session {}", session_id);
            return Ok(RefreshOutcome::ChallengeRequired {
                challenge_header: format!("\"{}\";id=\"{}\"", challenge, session_id),
            });
        };

        let proof = SignatureVerifier::verify(token)?;
        self.consume_challenge(ChallengePurpose::Refresh { session_id }, proof.challenge.as_deref())
            .await?;
        self.continuity.check(session_id, &proof.key).await?;

        if self.credentials.credential(session_id).await?.is_none() {
            return Err(SessionError::UnknownSession.into());
        }

        let grant = self.grant(session_id).await?;
        tracing::debug!("Rotated cookie for session {}", session_id);
        Ok(RefreshOutcome::Refreshed(grant))
    }

    /// Resolve a bound cookie to its session and credential
    pub async fn verify_session(&self, cookie_value: &str) -> Result<Option<VerifiedSession>> {
        if cookie_value.is_empty() {
            return Ok(None);
        }
        let Some(session_id) = self.credentials.session_for_cookie(cookie_value).await? else {
            return Ok(None);
        };
        let Some(credential) = self.credentials.credential(&session_id).await? else {
            return Ok(None);
        };
        Ok(Some(VerifiedSession {
            session_id,
            credential,
        }))
    }

    /// Drop every trace of `session_id`
    pub async fn revoke(&self, session_id: &str) -> Result<()> {
        self.registry.revoke(session_id).await?;
        self.credentials.revoke(session_id).await?;
        tracing::info!("Revoked DBSC session {}", session_id);
        Ok(())
    }

    /// Revoke the session behind a bound cookie. Returns whether one was found.
    pub async fn logout(&self, cookie_value: &str) -> Result<bool> {
        match self.credentials.session_for_cookie(cookie_value).await? {
            Some(session_id) => {
                self.revoke(&session_id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn instructions(&self, session_id: &str) -> SessionInstructions {
        SessionInstructions {
            session_identifier: session_id.to_string(),
            refresh_url: self.settings.refresh_url.clone(),
            scope: SessionScope {
                origin: self.settings.origin.clone(),
                include_site: self.settings.include_site,
                scope_specification: self.settings.scope_specification.clone(),
            },
            credentials: vec![SessionCredential {
                credential_type: "cookie".to_string(),
                name: self.cookie.name().to_string(),
                attributes: self.cookie.attributes(),
            }],
        }
    }

    async fn grant(&self, session_id: &str) -> Result<SessionGrant> {
        let cookie_value = random_token(COOKIE_VALUE_BYTES);
        self.credentials
            .bind_cookie(&cookie_value, session_id)
            .await?;
        Ok(SessionGrant {
            cookie_value,
            instructions: self.instructions(session_id),
        })
    }

    async fn consume_challenge(
        &self,
        purpose: ChallengePurpose<'_>,
        challenge: Option<&str>,
    ) -> Result<()> {
        let challenge = challenge.ok_or(SessionError::UnknownOrConsumedChallenge)?;
        if !self.challenges.consume(purpose, challenge).await? {
            return Err(SessionError::UnknownOrConsumedChallenge.into());
        }
        Ok(())
    }

    fn is_well_formed_session_id(session_id: &str) -> bool {
        session_id.len() <= MAX_SESSION_ID_LEN
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::services::FallbackIdentityStore;
    use crate::store::{ManualClock, MemoryStore};
    use crate::test_support::{header_param as param, leading_quoted, TestDevice};

    struct Harness {
        clock: Arc<ManualClock>,
        identities: FallbackIdentityStore,
        dbsc: DbscService,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new(clock.clone()));
        let identities = FallbackIdentityStore::new(kv.clone(), Duration::days(30));
        let dbsc = DbscService::new(kv, Arc::new(identities.clone()), &Config::default());
        Harness {
            clock,
            identities,
            dbsc,
        }
    }

    async fn register(h: &Harness, device: &TestDevice) -> SessionGrant {
        let fallback = h.identities.issue("user-1").await.unwrap();
        let header = h.dbsc.start(Some(&fallback)).await.unwrap();
        let token = device.proof(
            &param(&header, "challenge").unwrap(),
            param(&header, "authorization").as_deref(),
        );
        h.dbsc.register(Some(&token), None).await.unwrap()
    }

    async fn refresh_with(h: &Harness, session_id: &str, device: &TestDevice) -> Result<RefreshOutcome> {
        let RefreshOutcome::ChallengeRequired { challenge_header } =
            h.dbsc.refresh(Some(session_id), None).await.unwrap()
        else {
            panic!("expected a challenge");
        };
        let token = device.proof(&leading_quoted(&challenge_header), None);
        h.dbsc.refresh(Some(session_id), Some(&token)).await
    }

    fn session_error(result: Result<impl std::fmt::Debug>) -> SessionError {
        match result {
            Err(AppError::Session(e)) => e,
            other => panic!("expected session error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_requires_fallback_cookie() {
        let h = harness();
        assert!(matches!(h.dbsc.start(None).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(h.dbsc.start(Some("")).await, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn start_advertises_algorithms_path_and_challenge() {
        let h = harness();
        let fallback = h.identities.issue("user-1").await.unwrap();
        let header = h.dbsc.start(Some(&fallback)).await.unwrap();

        assert!(header.starts_with("(ES256 RS256);path=\"register-dbsc-cookie\";challenge=\""));
        assert!(param(&header, "challenge").unwrap().len() >= 22);
        assert!(param(&header, "authorization").is_some());
    }

    #[tokio::test]
    async fn start_with_unknown_identity_omits_authorization() {
        let h = harness();
        let header = h.dbsc.start(Some("stale-cookie")).await.unwrap();
        assert!(param(&header, "challenge").is_some());
        assert!(param(&header, "authorization").is_none());
    }

    #[tokio::test]
    async fn register_binds_session_and_credential() {
        let h = harness();
        let device = TestDevice::generate();
        let grant = register(&h, &device).await;

        let session_id = &grant.instructions.session_identifier;
        assert_eq!(h.dbsc.registry.lookup(session_id).await.unwrap(), Some(device.jwk()));

        let verified = h.dbsc.verify_session(&grant.cookie_value).await.unwrap().unwrap();
        assert_eq!(&verified.session_id, session_id);
        assert_eq!(verified.credential, b"user-1".to_vec());

        let body = &grant.instructions;
        assert_eq!(body.refresh_url, "/api/refresh-dbsc-cookie");
        assert_eq!(body.scope.origin, "http://localhost:3000");
        assert!(body.scope.include_site);
        assert_eq!(body.credentials[0].credential_type, "cookie");
        assert_eq!(body.credentials[0].name, "auth_cookie");
        assert_eq!(body.credentials[0].attributes, h.dbsc.cookie().attributes());
    }

    #[tokio::test]
    async fn register_without_token_is_rejected() {
        let h = harness();
        assert_eq!(
            session_error(h.dbsc.register(None, None).await),
            SessionError::MissingHeader(RESPONSE_HEADER)
        );
    }

    #[tokio::test]
    async fn register_with_unknown_challenge_is_rejected() {
        let h = harness();
        let device = TestDevice::generate();
        let fallback = h.identities.issue("user-1").await.unwrap();
        let token = device.proof("made-up", None);
        assert_eq!(
            session_error(h.dbsc.register(Some(&token), Some(&fallback)).await),
            SessionError::UnknownOrConsumedChallenge
        );
    }

    #[tokio::test]
    async fn register_twice_with_same_challenge_fails_second_time() {
        let h = harness();
        let device = TestDevice::generate();
        let fallback = h.identities.issue("user-1").await.unwrap();
        let header = h.dbsc.start(Some(&fallback)).await.unwrap();
        let challenge = param(&header, "challenge").unwrap();

        let first = device.proof(&challenge, None);
        let second = device.proof(&challenge, None);
        assert!(h.dbsc.register(Some(&first), Some(&fallback)).await.is_ok());
        assert_eq!(
            session_error(h.dbsc.register(Some(&second), Some(&fallback)).await),
            SessionError::UnknownOrConsumedChallenge
        );
    }

    #[tokio::test]
    async fn register_after_challenge_expiry_is_rejected() {
        let h = harness();
        let device = TestDevice::generate();
        let fallback = h.identities.issue("user-1").await.unwrap();
        let header = h.dbsc.start(Some(&fallback)).await.unwrap();
        h.clock.advance(Duration::minutes(6));

        let token = device.proof(&param(&header, "challenge").unwrap(), None);
        assert_eq!(
            session_error(h.dbsc.register(Some(&token), Some(&fallback)).await),
            SessionError::UnknownOrConsumedChallenge
        );
    }

    #[tokio::test]
    async fn register_falls_back_to_cookie_when_no_authorization_claim() {
        let h = harness();
        let device = TestDevice::generate();
        let fallback = h.identities.issue("user-7").await.unwrap();
        let header = h.dbsc.start(Some(&fallback)).await.unwrap();
        let token = device.proof(&param(&header, "challenge").unwrap(), None);

        let grant = h.dbsc.register(Some(&token), Some(&fallback)).await.unwrap();
        let verified = h.dbsc.verify_session(&grant.cookie_value).await.unwrap().unwrap();
        assert_eq!(verified.credential, b"user-7".to_vec());
    }

    #[tokio::test]
    async fn register_without_any_credential_is_rejected() {
        let h = harness();
        let device = TestDevice::generate();
        let header = h.dbsc.start(Some("stale-cookie")).await.unwrap();
        let token = device.proof(&param(&header, "challenge").unwrap(), None);
        assert_eq!(
            session_error(h.dbsc.register(Some(&token), Some("stale-cookie")).await),
            SessionError::MissingCredential
        );
    }

    #[tokio::test]
    async fn refresh_without_session_id_is_rejected() {
        let h = harness();
        assert_eq!(
            session_error(h.dbsc.refresh(None, None).await),
            SessionError::MissingHeader(SESSION_ID_HEADER)
        );
    }

    #[tokio::test]
    async fn refresh_without_token_issues_challenge_for_session() {
        let h = harness();
        let outcome = h.dbsc.refresh(Some("abc"), None).await.unwrap();
        let RefreshOutcome::ChallengeRequired { challenge_header } = outcome else {
            panic!("expected a challenge");
        };
        assert!(challenge_header.ends_with(";id=\"abc\""));
        let refresh_for_abc = ChallengePurpose::Refresh { session_id: "abc" };
        assert!(h
            .dbsc
            .challenges
            .consume(refresh_for_abc, &leading_quoted(&challenge_header))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn refresh_keeps_session_id_and_rotates_cookie() {
        let h = harness();
        let device = TestDevice::generate();
        let grant = register(&h, &device).await;
        let session_id = grant.instructions.session_identifier.clone();

        let mut previous_cookie = grant.cookie_value;
        for _ in 0..3 {
            let RefreshOutcome::Refreshed(next) = refresh_with(&h, &session_id, &device).await.unwrap()
            else {
                panic!("expected a refreshed session");
            };
            assert_eq!(next.instructions.session_identifier, session_id);
            assert_ne!(next.cookie_value, previous_cookie);
            assert_eq!(next.instructions, h.dbsc.instructions(&session_id));
            assert!(h.dbsc.verify_session(&previous_cookie).await.unwrap().is_none());
            assert!(h.dbsc.verify_session(&next.cookie_value).await.unwrap().is_some());
            previous_cookie = next.cookie_value;
        }
    }

    #[tokio::test]
    async fn refresh_with_different_key_is_rejected() {
        let h = harness();
        let device = TestDevice::generate();
        let attacker = TestDevice::generate();
        let grant = register(&h, &device).await;
        let session_id = grant.instructions.session_identifier.clone();

        assert_eq!(
            session_error(refresh_with(&h, &session_id, &attacker).await),
            SessionError::KeyMismatch
        );
        // The legitimate cookie is untouched.
        assert!(h.dbsc.verify_session(&grant.cookie_value).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn refresh_reusing_challenge_is_rejected() {
        let h = harness();
        let device = TestDevice::generate();
        let grant = register(&h, &device).await;
        let session_id = grant.instructions.session_identifier.clone();

        let RefreshOutcome::ChallengeRequired { challenge_header } =
            h.dbsc.refresh(Some(&session_id), None).await.unwrap()
        else {
            panic!("expected a challenge");
        };
        let token = device.proof(&leading_quoted(&challenge_header), None);
        assert!(h.dbsc.refresh(Some(&session_id), Some(&token)).await.is_ok());
        assert_eq!(
            session_error(h.dbsc.refresh(Some(&session_id), Some(&token)).await),
            SessionError::UnknownOrConsumedChallenge
        );
    }

    #[tokio::test]
    async fn refresh_for_unknown_session_is_rejected() {
        let h = harness();
        let device = TestDevice::generate();
        assert_eq!(
            session_error(refresh_with(&h, "no-such-session", &device).await),
            SessionError::UnknownSession
        );
        assert_eq!(
            session_error(h.dbsc.refresh(Some("bad\"id"), None).await),
            SessionError::UnknownSession
        );
    }

    #[tokio::test]
    async fn cookie_expires_but_refresh_restores_access() {
        let h = harness();
        let device = TestDevice::generate();
        let grant = register(&h, &device).await;
        let session_id = grant.instructions.session_identifier.clone();

        h.clock.advance(Duration::seconds(16));
        assert!(h.dbsc.verify_session(&grant.cookie_value).await.unwrap().is_none());

        let RefreshOutcome::Refreshed(next) = refresh_with(&h, &session_id, &device).await.unwrap()
        else {
            panic!("expected a refreshed session");
        };
        let verified = h.dbsc.verify_session(&next.cookie_value).await.unwrap().unwrap();
        assert_eq!(verified.credential, b"user-1".to_vec());
    }

    #[tokio::test]
    async fn revoked_session_cannot_refresh() {
        let h = harness();
        let device = TestDevice::generate();
        let grant = register(&h, &device).await;
        let session_id = grant.instructions.session_identifier.clone();

        assert!(h.dbsc.logout(&grant.cookie_value).await.unwrap());
        assert!(h.dbsc.verify_session(&grant.cookie_value).await.unwrap().is_none());
        assert_eq!(
            session_error(refresh_with(&h, &session_id, &device).await),
            SessionError::UnknownSession
        );
        assert!(!h.dbsc.logout(&grant.cookie_value).await.unwrap());
    }

    #[tokio::test]
    async fn refresh_challenge_cannot_register() {
        let h = harness();
        let device = TestDevice::generate();
        let fallback = h.identities.issue("user-1").await.unwrap();

        let RefreshOutcome::ChallengeRequired { challenge_header } =
            h.dbsc.refresh(Some("anything"), None).await.unwrap()
        else {
            panic!("expected a challenge");
        };
        let token = device.proof(&leading_quoted(&challenge_header), None);
        assert_eq!(
            session_error(h.dbsc.register(Some(&token), Some(&fallback)).await),
            SessionError::UnknownOrConsumedChallenge
        );
    }

    #[tokio::test]
    async fn refresh_rejects_challenge_issued_for_another_purpose() {
        let h = harness();
        let device = TestDevice::generate();
        let first = register(&h, &device).await;
        let second = register(&h, &device).await;
        let first_id = first.instructions.session_identifier.clone();
        let second_id = second.instructions.session_identifier.clone();

        // A registration challenge.
        let fallback = h.identities.issue("user-1").await.unwrap();
        let header = h.dbsc.start(Some(&fallback)).await.unwrap();
        let token = device.proof(&param(&header, "challenge").unwrap(), None);
        assert_eq!(
            session_error(h.dbsc.refresh(Some(&first_id), Some(&token)).await),
            SessionError::UnknownOrConsumedChallenge
        );

        // A refresh challenge minted for a different session.
        let RefreshOutcome::ChallengeRequired { challenge_header } =
            h.dbsc.refresh(Some(&second_id), None).await.unwrap()
        else {
            panic!("expected a challenge");
        };
        let token = device.proof(&leading_quoted(&challenge_header), None);
        assert_eq!(
            session_error(h.dbsc.refresh(Some(&first_id), Some(&token)).await),
            SessionError::UnknownOrConsumedChallenge
        );
    }

    #[tokio::test]
    async fn key_binding_expires_with_credential() {
        let h = harness();
        let device = TestDevice::generate();
        let grant = register(&h, &device).await;
        let session_id = grant.instructions.session_identifier.clone();

        h.clock.advance(Duration::days(30));
        assert_eq!(h.dbsc.registry.lookup(&session_id).await.unwrap(), None);
        assert_eq!(h.dbsc.credentials.credential(&session_id).await.unwrap(), None);
        assert_eq!(
            session_error(refresh_with(&h, &session_id, &device).await),
            SessionError::UnknownSession
        );
    }

    #[test]
    fn oversized_ttls_do_not_panic_on_construction() {
        let clock = Arc::new(ManualClock::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new(clock));
        let identities = FallbackIdentityStore::new(kv.clone(), Duration::days(30));
        let mut config = Config::default();
        config.dbsc.credential_ttl_days = u64::MAX / 2;
        config.dbsc.challenge_ttl_minutes = u64::MAX;
        config.dbsc.cookie_binding_ttl_secs = u64::MAX;

        let dbsc = DbscService::new(kv, Arc::new(identities), &config);
        assert_eq!(dbsc.cookie().name(), "auth_cookie");
    }
}
