//! Public authentication endpoints.
//!
//! Login and token issuance live outside this process; the group only
//! reports whether the instance has been set up.

use axum::{Json, Router, extract::State, routing::get};
use jellystat_core::Store;
use serde_json::{Value, json};

use super::ApiResult;
use crate::server::AppState;
use crate::store_io;

pub(super) fn router(state: AppState) -> Router {
    Router::new()
        .route("/isConfigured", get(is_configured))
        .with_state(state)
}

/// `{"state": 1}` once the configuration record exists, `{"state": 0}` before.
async fn is_configured(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let configured = store_io::run(&state.store, Store::config_record)
        .await?
        .is_some();
    Ok(Json(json!({ "state": u8::from(configured) })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{get_json, state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_is_configured() {
        let (state, _dir) = state();
        let (status, body) = get_json(router(state.clone()), "/isConfigured").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"state": 1}));
    }

    #[tokio::test]
    async fn test_is_not_configured_before_migration() {
        let (mut state, _dir) = state();
        state.store = jellystat_core::Store::temporary().unwrap();

        let (_, body) = get_json(router(state), "/isConfigured").await;
        assert_eq!(body, json!({"state": 0}));
    }
}
