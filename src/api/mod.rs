use axum::{http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

mod media;
mod playback;
mod scan;
mod upnp;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .nest("/media", media::routes())
        .route("/search", get(media::search))
        .route("/events", get(media::events))
        .nest("/metadata", media::metadata_routes())
        .nest("/scan", scan::routes())
        .nest("/shares", scan::share_routes())
        .nest("/playback", playback::routes())
        .route("/upnp/features", axum::routing::post(upnp::parse_features))
}

pub(crate) type ApiError = (StatusCode, String);

pub(crate) fn internal<E: std::fmt::Display>(err: E) -> ApiError {
    tracing::error!("Request failed: {}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

pub(crate) fn not_found(what: impl std::fmt::Display) -> ApiError {
    (StatusCode::NOT_FOUND, format!("{} not found", what))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    shares: usize,
    running_scans: usize,
}

async fn health(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        shares: state.config.shares.len(),
        running_scans: state.jobs.list().iter().filter(|j| j.is_running()).count(),
    })
}
