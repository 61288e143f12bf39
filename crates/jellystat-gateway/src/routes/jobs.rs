//! Job triggers, run statistics and the run log.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use jellystat_core::{JobRun, StoreError};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ApiError, ApiResult};
use crate::server::AppState;
use crate::store_io;

/// Default number of log entries returned.
const DEFAULT_LOG_LIMIT: usize = 50;
/// Upper bound on log entries returned.
const MAX_LOG_LIMIT: usize = 1000;

pub(super) fn sync_router(state: AppState) -> Router {
    Router::new()
        .route("/beginSync", post(begin_sync))
        .with_state(state)
}

pub(super) fn backup_router(state: AppState) -> Router {
    Router::new()
        .route("/beginBackup", post(begin_backup))
        .with_state(state)
}

pub(super) fn stats_router(state: AppState) -> Router {
    Router::new().route("/jobs", get(job_stats)).with_state(state)
}

pub(super) fn logs_router(state: AppState) -> Router {
    Router::new().route("/getLogs", get(get_logs)).with_state(state)
}

async fn run_job(state: &AppState, name: &str) -> ApiResult<Json<JobRun>> {
    let run = state
        .jobs
        .run_now(name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {name}")))??;
    Ok(Json(run))
}

async fn begin_sync(State(state): State<AppState>) -> ApiResult<Json<JobRun>> {
    run_job(&state, "sync").await
}

async fn begin_backup(State(state): State<AppState>) -> ApiResult<Json<JobRun>> {
    run_job(&state, "backup").await
}

/// Last run of every job, keyed by job name (`null` if it never ran).
async fn job_stats(State(state): State<AppState>) -> ApiResult<Json<Map<String, Value>>> {
    let names = state.jobs.names();
    let last_runs = store_io::run(&state.store, move |store| {
        names
            .into_iter()
            .map(|name| Ok((name, store.last_run(name)?)))
            .collect::<Result<Vec<_>, StoreError>>()
    })
    .await?;

    let mut stats = Map::new();
    for (name, last) in last_runs {
        stats.insert(
            name.to_string(),
            serde_json::to_value(last).map_err(StoreError::from)?,
        );
    }
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
    job: Option<String>,
}

async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<JobRun>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    let runs = store_io::run(&state.store, move |store| match query.job.as_deref() {
        Some(job) => store.job_runs_for(job, limit),
        None => store.job_runs(limit),
    })
    .await?;
    Ok(Json(runs))
}
