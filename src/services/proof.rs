//! Proof-of-possession check for `Sec-Session-Response` tokens.
//!
//! The token is a compact JWS whose payload carries the signer's own public
//! key. A valid signature proves the sender holds the matching private key,
//! nothing more; whether that key belongs to the session is decided by
//! [`ContinuityChecker`](super::ContinuityChecker).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::Value;

use crate::error::SessionError;
use crate::models::EcPublicJwk;

/// Payload member holding the self-asserted JWK
pub const PUBLIC_KEY_CLAIM: &str = "key";
/// Payload member echoing the server challenge
pub const CHALLENGE_CLAIM: &str = "jti";
/// Payload member echoing the `authorization` handle from registration
pub const AUTHORIZATION_CLAIM: &str = "authorization";

const EC_KEY_TYPE: &str = "EC";
const P256_CURVE: &str = "P-256";
const ES256: &str = "ES256";
const P256_COORDINATE_LEN: usize = 32;
const ES256_SIGNATURE_LEN: usize = 64;

/// A token whose signature checked out against its own embedded key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedProof {
    pub key: EcPublicJwk,
    pub challenge: Option<String>,
    pub authorization: Option<String>,
}

pub struct SignatureVerifier;

impl SignatureVerifier {
    pub fn verify(token: &str) -> Result<VerifiedProof, SessionError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = segments.as_slice() else {
            return Err(SessionError::MalformedToken("expected three segments"));
        };

        let header_json = decode_json(header)?;
        match header_json.get("alg").and_then(Value::as_str) {
            None | Some(ES256) => {}
            Some(_) => return Err(SessionError::InvalidSignature),
        }

        let payload_json = decode_json(payload)?;
        let key = embedded_key(&payload_json)?;

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SessionError::MalformedToken("signature is not base64url"))?;
        if signature_bytes.len() != ES256_SIGNATURE_LEN {
            return Err(SessionError::InvalidSignature);
        }

        let decoding_key = DecodingKey::from_ec_components(&key.x, &key.y)
            .map_err(|_| SessionError::MalformedToken("unusable public key"))?;

        // The signed bytes are the base64url segments as sent, not the decoded JSON.
        let signing_input = format!("{}.{}", header, payload);
        let valid = jsonwebtoken::crypto::verify(
            signature,
            signing_input.as_bytes(),
            &decoding_key,
            Algorithm::ES256,
        )
        .map_err(|_| SessionError::InvalidSignature)?;
        if !valid {
            return Err(SessionError::InvalidSignature);
        }

        Ok(VerifiedProof {
            key,
            challenge: string_claim(&payload_json, CHALLENGE_CLAIM),
            authorization: string_claim(&payload_json, AUTHORIZATION_CLAIM),
        })
    }
}

fn decode_json(segment: &str) -> Result<Value, SessionError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| SessionError::MalformedToken("segment is not base64url"))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|_| SessionError::MalformedToken("segment is not JSON"))?;
    if !value.is_object() {
        return Err(SessionError::MalformedToken("segment is not a JSON object"));
    }
    Ok(value)
}

fn embedded_key(payload: &Value) -> Result<EcPublicJwk, SessionError> {
    let raw = payload
        .get(PUBLIC_KEY_CLAIM)
        .cloned()
        .ok_or(SessionError::MalformedToken("missing embedded key"))?;
    let key: EcPublicJwk = serde_json::from_value(raw)
        .map_err(|_| SessionError::MalformedToken("embedded key is not a JWK"))?;

    if key.kty != EC_KEY_TYPE || key.crv != P256_CURVE {
        return Err(SessionError::MalformedToken("embedded key is not EC P-256"));
    }
    for coordinate in [&key.x, &key.y] {
        let decoded = URL_SAFE_NO_PAD
            .decode(coordinate)
            .map_err(|_| SessionError::MalformedToken("key coordinate is not base64url"))?;
        if decoded.len() != P256_COORDINATE_LEN {
            return Err(SessionError::MalformedToken("key coordinate has wrong length"));
        }
    }
    Ok(key)
}

fn string_claim(payload: &Value, name: &str) -> Option<String> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
