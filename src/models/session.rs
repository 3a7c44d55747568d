use serde::{Deserialize, Serialize};

use crate::config::ScopeRule;

/// EC P-256 public key in JWK form, as embedded by the client in its proof.
///
/// Equality is exact string equality on all four members; that is the
/// continuity check between registration and every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcPublicJwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

/// Body returned by register and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInstructions {
    pub session_identifier: String,
    pub refresh_url: String,
    pub scope: SessionScope,
    pub credentials: Vec<SessionCredential>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionScope {
    pub origin: String,
    pub include_site: bool,
    pub scope_specification: Vec<ScopeRule>,
}

/// Describes the bound cookie; `attributes` must match the Set-Cookie exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub name: String,
    pub attributes: String,
}

/// Result of a successful register or refresh
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub cookie_value: String,
    pub instructions: SessionInstructions,
}

/// Outcome of the refresh endpoint
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// No proof yet: answer 401 with this `Sec-Session-Challenge` value.
    ChallengeRequired { challenge_header: String },
    Refreshed(SessionGrant),
}

/// What a resource endpoint learns from a bound cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSession {
    pub session_id: String,
    pub credential: Vec<u8>,
}

/// Response of `GET /api/session`
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfoResponse {
    pub session_identifier: String,
    pub credential: String,
}
