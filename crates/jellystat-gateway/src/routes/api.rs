//! API key management and identity.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use chrono::Utc;
use jellystat_core::{ApiKeyEntry, Store};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, ApiResult};
use crate::auth::Identity;
use crate::server::AppState;
use crate::store_io;

/// Length of generated keys in bytes (hex encoded on the wire).
const KEY_BYTES: usize = 32;

pub(super) fn router(state: AppState) -> Router {
    Router::new()
        .route("/keys", get(list_keys).post(create_key).delete(delete_key))
        .route("/whoami", get(whoami))
        .with_state(state)
}

async fn list_keys(State(state): State<AppState>) -> ApiResult<Json<Vec<ApiKeyEntry>>> {
    let keys = store_io::run(&state.store, Store::api_keys).await?;
    Ok(Json(keys.unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
struct CreateKey {
    name: String,
}

async fn create_key(
    State(state): State<AppState>,
    Json(request): Json<CreateKey>,
) -> ApiResult<(StatusCode, Json<ApiKeyEntry>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Key name is required".to_string()));
    }

    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    let mut entry = ApiKeyEntry::new(hex::encode(bytes)).with_name(name);
    entry
        .metadata
        .insert("createdAt".to_string(), json!(Utc::now()));

    let created = entry.clone();
    store_io::run(&state.store, move |store| {
        store.update_config_record(|record| {
            record
                .api_keys
                .get_or_insert_with(Vec::new)
                .push(created.clone());
        })
    })
    .await?;

    tracing::info!(name = %name, "API key created");
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
struct DeleteKey {
    key: String,
}

async fn delete_key(
    State(state): State<AppState>,
    Json(request): Json<DeleteKey>,
) -> ApiResult<Json<Vec<ApiKeyEntry>>> {
    let (record, removed) = store_io::run(&state.store, move |store| {
        let mut removed = false;
        let record = store.update_config_record(|record| {
            removed = false;
            if let Some(keys) = record.api_keys.as_mut() {
                let before = keys.len();
                keys.retain(|entry| entry.key != request.key);
                removed = keys.len() != before;
            }
        })?;
        Ok((record, removed))
    })
    .await?;

    if !removed {
        return Err(ApiError::NotFound("API key not found".to_string()));
    }

    tracing::info!("API key deleted");
    Ok(Json(record.api_keys.unwrap_or_default()))
}

async fn whoami(Extension(identity): Extension<Identity>) -> Json<Value> {
    let method = if identity.0.is_some() { "bearer" } else { "apiKey" };
    Json(json!({ "user": identity.0, "method": method }))
}
