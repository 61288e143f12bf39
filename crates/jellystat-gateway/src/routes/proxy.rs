//! Media server passthrough.

use axum::{Router, routing::any};

use super::ApiError;

pub(super) fn router() -> Router {
    Router::new()
        .route("/", any(passthrough))
        .route("/{*path}", any(passthrough))
}

async fn passthrough() -> ApiError {
    ApiError::NotImplemented("Proxy passthrough is not available in this build".to_string())
}
