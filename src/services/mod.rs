pub mod auth;
pub mod challenge;
pub mod cookie;
pub mod credentials;
pub mod dbsc;
pub mod identity;
pub mod proof;
pub mod registry;

pub use auth::AuthService;
pub use challenge::{ChallengePurpose, ChallengeStore};
pub use cookie::BoundCookie;
pub use credentials::CredentialStore;
pub use dbsc::DbscService;
pub use identity::{CredentialResolver, FallbackIdentityStore};
pub use proof::SignatureVerifier;
pub use registry::{ContinuityChecker, SessionKeyRegistry};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;

/// URL-safe random value with `bytes` bytes of entropy
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
