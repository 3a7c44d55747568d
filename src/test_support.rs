//! Device-side helpers for tests: a P-256 key pair that signs DBSC proofs.

use axum_extra::extract::cookie::Cookie;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde_json::{json, Value};

use crate::models::EcPublicJwk;

pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct TestDevice {
    pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl TestDevice {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        Self { pair, rng }
    }

    pub fn jwk(&self) -> EcPublicJwk {
        // Uncompressed SEC1 point: 0x04 || x || y
        let point = self.pair.public_key().as_ref();
        EcPublicJwk {
            crv: "P-256".to_string(),
            kty: "EC".to_string(),
            x: URL_SAFE_NO_PAD.encode(&point[1..33]),
            y: URL_SAFE_NO_PAD.encode(&point[33..65]),
        }
    }

    /// The token a browser would send for `challenge`.
    pub fn proof(&self, challenge: &str, authorization: Option<&str>) -> String {
        let mut claims = json!({
            "aud": "http://localhost:3000/api/register-dbsc-cookie",
            "jti": challenge,
            "iat": 1_700_000_000,
            "key": self.jwk(),
        });
        if let Some(handle) = authorization {
            claims["authorization"] = Value::String(handle.to_string());
        }
        self.sign_claims(claims)
    }

    pub fn sign_claims(&self, claims: Value) -> String {
        let header = encode_segment(br#"{"alg":"ES256","typ":"dbsc+jwt"}"#);
        let payload = encode_segment(claims.to_string().as_bytes());
        self.sign_segments(&header, &payload)
    }

    pub fn sign_segments(&self, header: &str, payload: &str) -> String {
        let input = format!("{}.{}", header, payload);
        let signature = self.pair.sign(&self.rng, input.as_bytes()).unwrap();
        format!("{}.{}", input, URL_SAFE_NO_PAD.encode(signature.as_ref()))
    }
}

/// Parses `attributes` the way a browser reads a Set-Cookie line and compares it with `set_cookie`.
pub fn assert_attributes_match(attributes: &str, set_cookie: &Cookie<'_>) {
    let described = Cookie::parse(format!("{}=x; {}", set_cookie.name(), attributes)).unwrap();
    assert_eq!(set_cookie.domain(), described.domain());
    assert_eq!(set_cookie.path(), described.path());
    assert_eq!(set_cookie.same_site(), described.same_site());
    assert_eq!(set_cookie.secure().unwrap_or(false), described.secure().unwrap_or(false));
    assert_eq!(set_cookie.http_only().unwrap_or(false), described.http_only().unwrap_or(false));
}

/// Pull `name="value"` out of a structured header
pub fn header_param(header: &str, name: &str) -> Option<String> {
    let marker = format!("{}=\"", name);
    let start = header.find(&marker)? + marker.len();
    let end = header[start..].find('"')? + start;
    Some(header[start..end].to_string())
}

/// First quoted string of a header, e.g. the challenge in `"c";id="s"`
pub fn leading_quoted(header: &str) -> String {
    header.split('"').nth(1).unwrap().to_string()
}
