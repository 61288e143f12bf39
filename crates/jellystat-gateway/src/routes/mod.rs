//! Route-group handlers.
//!
//! | Prefix     | Access    |
//! |------------|-----------|
//! | `/auth`    | public    |
//! | `/proxy`   | public    |
//! | `/swagger` | public    |
//! | `/api`     | protected |
//! | `/sync`    | protected |
//! | `/stats`   | protected |
//! | `/backup`  | protected |
//! | `/logs`    | protected |
//! | `/utils`   | protected |
//!
//! Anything else falls through to the static front-end.

mod api;
mod auth;
mod jobs;
mod proxy;
mod swagger;
mod utils;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use jellystat_core::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::registry::{Access, RouteRegistry};
use crate::server::AppState;

/// Errors returned by route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Referenced resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Feature handled outside this process.
    #[error("{0}")]
    NotImplemented(String),

    /// Store failure.
    #[error("Database error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for route handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Store(e) => {
                tracing::error!("Request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorBody {
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Register every route group with its access level.
#[must_use]
pub fn register_groups(registry: RouteRegistry, state: &AppState) -> RouteRegistry {
    registry
        .register("/auth", Access::Public, auth::router(state.clone()))
        .register("/proxy", Access::Public, proxy::router())
        .register("/swagger", Access::Public, swagger::router())
        .register("/api", Access::Protected, api::router(state.clone()))
        .register("/sync", Access::Protected, jobs::sync_router(state.clone()))
        .register("/stats", Access::Protected, jobs::stats_router(state.clone()))
        .register("/backup", Access::Protected, jobs::backup_router(state.clone()))
        .register("/logs", Access::Protected, jobs::logs_router(state.clone()))
        .register("/utils", Access::Protected, utils::router())
}
