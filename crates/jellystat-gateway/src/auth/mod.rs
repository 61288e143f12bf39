//! Authentication for the protected route groups.
//!
//! This module provides:
//! - Bearer token verification against the process secret
//! - API key lookup against the persisted configuration record
//! - The [`AuthGateway`] decision procedure and its typed rejections

mod gateway;
mod jwt;

#[cfg(test)]
pub(crate) use jwt::test_tokens;

pub use gateway::{AuthGateway, Authorized, CredentialStore, Identity};
pub use jwt::{BearerVerifier, Claims};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Why a request was refused.
///
/// Every variant is terminal for the request and never escapes the gateway
/// as anything other than a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Neither a bearer token nor an API key was presented.
    #[error("Authentication failed. No token or API key provided.")]
    NoCredential,

    /// The `Authorization` header has no usable token.
    #[error("Malformed authorization header")]
    MalformedBearer,

    /// The bearer token failed signature or expiry checks.
    #[error("Invalid token")]
    InvalidSignature,

    /// An API key was presented but none are configured.
    #[error("No API keys configured")]
    NoKeysConfigured,

    /// The presented API key matches no configured key.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// The configuration record could not be read.
    #[error("Failed to read API key configuration")]
    StoreUnavailable,
}

impl Rejection {
    /// HTTP status for this rejection.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::NoCredential | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::MalformedBearer | Self::InvalidApiKey => StatusCode::FORBIDDEN,
            Self::NoKeysConfigured => StatusCode::NOT_FOUND,
            Self::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::MalformedBearer => "malformed_bearer",
            Self::InvalidSignature => "invalid_signature",
            Self::NoKeysConfigured => "no_keys_configured",
            Self::InvalidApiKey => "invalid_api_key",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Body sent with every rejection.
#[derive(Debug, Serialize)]
struct RejectionBody {
    message: String,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = RejectionBody {
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
