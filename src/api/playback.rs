// Playback queue control for the active session

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{internal, ApiError};
use crate::playback::{PlaybackError, QueueItem};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/load", post(load))
        .route("/current", get(current))
        .route("/next", post(next))
        .route("/previous", post(previous))
        .route("/move", post(move_to))
        .route("/queue", get(queue))
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct QueueView {
    pub total: usize,
    pub up_next: Vec<QueueItem>,
}

fn end_of_queue() -> ApiError {
    (StatusCode::NOT_FOUND, "no item at that position".to_string())
}

/// POST /playback/load
async fn load(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadRequest>,
) -> Result<Json<QueueItem>, ApiError> {
    let mut queue = state.playback.lock().await;
    match queue.load_from_uri(&state.index, &req.uri).await {
        Ok(item) => Ok(Json(item.clone())),
        Err(PlaybackError::NotFound(uri)) => Err(super::not_found(uri)),
        Err(e @ PlaybackError::NotPlayable(_)) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => Err(internal(e)),
    }
}

/// GET /playback/current
async fn current(State(state): State<Arc<AppState>>) -> Result<Json<QueueItem>, ApiError> {
    let queue = state.playback.lock().await;
    queue.current().cloned().map(Json).ok_or_else(end_of_queue)
}

/// POST /playback/next
async fn next(State(state): State<Arc<AppState>>) -> Result<Json<QueueItem>, ApiError> {
    let mut queue = state.playback.lock().await;
    queue.next().cloned().map(Json).ok_or_else(end_of_queue)
}

/// POST /playback/previous
async fn previous(State(state): State<Arc<AppState>>) -> Result<Json<QueueItem>, ApiError> {
    let mut queue = state.playback.lock().await;
    queue.previous().cloned().map(Json).ok_or_else(end_of_queue)
}

/// POST /playback/move
async fn move_to(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<QueueItem>, ApiError> {
    let mut queue = state.playback.lock().await;
    queue
        .move_to_item(req.id)
        .cloned()
        .map(Json)
        .ok_or_else(|| super::not_found(format!("queue item {}", req.id)))
}

/// GET /playback/queue
async fn queue(State(state): State<Arc<AppState>>) -> Json<QueueView> {
    let queue = state.playback.lock().await;
    Json(QueueView {
        total: queue.len(),
        up_next: queue.queue_view().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{send, test_state};
    use crate::models::{MediaCategory, MediaRecord};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_queue_navigation() {
        let state = test_state().await;
        for name in ["e1.mkv", "e2.mkv"] {
            let record = MediaRecord::new(
                format!("file:///tv/{}", name),
                Some("file:///tv".to_string()),
                MediaCategory::TvEpisode,
                name,
            );
            state.index.upsert(&record).await.unwrap();
        }

        let (status, item) = send(
            &state,
            "POST",
            "/playback/load",
            Some(json!({ "uri": "file:///tv/e1.mkv" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["record"]["display_name"], "e1.mkv");
        let first_id = item["id"].clone();

        let (status, item) = send(&state, "POST", "/playback/next", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["record"]["display_name"], "e2.mkv");

        let (status, _) = send(&state, "POST", "/playback/next", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, view) = send(&state, "GET", "/playback/queue", None).await;
        assert_eq!(view["total"], 2);
        assert_eq!(view["up_next"].as_array().unwrap().len(), 1);

        let (status, item) =
            send(&state, "POST", "/playback/move", Some(json!({ "id": first_id }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["record"]["display_name"], "e1.mkv");
    }

    #[tokio::test]
    async fn test_load_directory_is_rejected() {
        let state = test_state().await;
        let dir = MediaRecord::new("file:///tv", None, MediaCategory::Directory, "tv");
        state.index.upsert(&dir).await.unwrap();

        let (status, _) = send(
            &state,
            "POST",
            "/playback/load",
            Some(json!({ "uri": "file:///tv" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, "GET", "/playback/current", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
