//! Bearer token verification.

use jellystat_core::AuthSettings;
use jsonwebtoken::{DecodingKey, TokenData, Validation, decode};
use serde::{Deserialize, Serialize};

/// Claims carried by a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque identity of the token holder.
    #[serde(default)]
    pub user: serde_json::Value,
    /// Expiration (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Verifies HS256 bearer tokens against the process secret.
pub struct BearerVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl BearerVerifier {
    /// Create a verifier for the configured secret.
    #[must_use]
    pub fn new(settings: &AuthSettings) -> Self {
        let mut validation = Validation::default();
        // Tokens without `exp` are accepted; an `exp` in the past is not.
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            decoding_key: DecodingKey::from_secret(settings.secret_bytes()),
            validation,
        }
    }

    /// Check signature and expiry, returning the claims.
    ///
    /// # Errors
    ///
    /// Returns error if the token is malformed, badly signed or expired.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let token_data: TokenData<Claims> = decode(token, &self.decoding_key, &self.validation)?;
        Ok(token_data.claims)
    }
}

impl std::fmt::Debug for BearerVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerVerifier")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}
