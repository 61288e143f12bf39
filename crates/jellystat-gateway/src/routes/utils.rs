//! Miscellaneous protected endpoints.

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

pub(super) fn router() -> Router {
    Router::new().route("/version", get(version))
}

async fn version() -> Json<Value> {
    Json(json!({ "version": crate::VERSION }))
}
