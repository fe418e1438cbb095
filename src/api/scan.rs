// Scan jobs and share registration

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{internal, not_found, ApiError};
use crate::browser::name_from_uri;
use crate::scanner::{JobInfo, ScanMode, ScanTarget};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(start_scan))
        .route("/all", post(start_full_scan))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
}

pub fn share_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(add_share))
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub uri: String,
    pub name: Option<String>,
}

/// POST /scan: user-initiated, so the first failure aborts the job
async fn start_scan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> Result<(StatusCode, Json<JobInfo>), ApiError> {
    let record = state
        .index
        .get(&req.uri)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(&req.uri))?;

    if !record.is_directory() && !record.category.is_lookupable() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("{} items cannot be scanned", record.category),
        ));
    }

    let job = state
        .jobs
        .start(ScanTarget::Item(record), ScanMode::FailFast);
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// POST /scan/all
async fn start_full_scan(State(state): State<Arc<AppState>>) -> (StatusCode, Json<JobInfo>) {
    let job = state.jobs.start(ScanTarget::Everything, ScanMode::Isolated);
    (StatusCode::ACCEPTED, Json(job))
}

/// GET /scan/jobs
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobInfo>> {
    Json(state.jobs.list())
}

/// GET /scan/jobs/:id
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    state
        .jobs
        .get(id)
        .map(Json)
        .ok_or_else(|| not_found(format!("scan job {}", id)))
}

/// POST /scan/jobs/:id/cancel
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.jobs.cancel(id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err((
            StatusCode::CONFLICT,
            format!("scan job {} is not running", id),
        ))
    }
}

/// POST /shares: register a share root and scan it
async fn add_share(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShareRequest>,
) -> Result<(StatusCode, Json<JobInfo>), ApiError> {
    let uri = req.uri.trim();
    if uri.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "uri is required".to_string()));
    }

    let name = req
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| name_from_uri(uri));
    let root = state
        .jobs
        .scanner()
        .add_root(uri, &name)
        .await
        .map_err(internal)?;

    let job = state.jobs.start(ScanTarget::Item(root), ScanMode::FailFast);
    Ok((StatusCode::ACCEPTED, Json(job)))
}
