//! Bearer token decoding.
//!
//! mudlink does not issue tokens. The HTTP login layer does that; the
//! connection core only needs to read them back. [`TokenDecoder`] is the
//! seam: a single method that turns a token string into [`Claims`] or
//! `None`. [`JwtDecoder`] is the production implementation for HS256
//! JWTs, and tests plug in their own decoders.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// The claims the connection core reads from a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The account id. Absent or empty means the token is unusable.
    #[serde(default)]
    pub sub: Option<String>,

    /// Expiry, seconds since the UNIX epoch.
    pub exp: u64,

    /// Issued-at, seconds since the UNIX epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

impl Claims {
    /// Returns the subject if it is present and non-empty.
    pub fn subject(&self) -> Option<&str> {
        self.sub.as_deref().filter(|s| !s.is_empty())
    }
}

/// Turns a bearer token into claims.
///
/// Decoding is synchronous (signature checks are CPU work, not I/O), and
/// the trait is object-safe so the manager can hold an
/// `Arc<dyn TokenDecoder>`.
pub trait TokenDecoder: Send + Sync + 'static {
    /// Returns the token's claims, or `None` if the token is malformed,
    /// badly signed, or expired.
    fn decode(&self, token: &str) -> Option<Claims>;
}

/// Decodes HS256-signed JWTs with a shared secret.
#[derive(Clone)]
pub struct JwtDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl JwtDecoder {
    /// Creates a decoder for tokens signed with `secret`.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Requires tokens to carry the given audience.
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self
    }
}

impl TokenDecoder for JwtDecoder {
    fn decode(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "token rejected");
                None
            }
        }
    }
}
