// Media index browsing, search, progress, and change events

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use super::{internal, not_found, ApiError};
use crate::db::metadata;
use crate::models::{Actor, Banner, Episode, MediaRecord, Movie, MovieImage, Series};
use crate::AppState;

const DEFAULT_SEARCH_LIMIT: i64 = 50;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_media))
        .route("/children", get(get_children))
        .route("/roots", get(get_roots))
        .route("/progress", post(save_progress))
        .route("/remove", post(remove_media))
}

pub fn metadata_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/series/:id", get(get_series))
        .route("/movies/:id", get(get_movie))
}

#[derive(Debug, Deserialize)]
pub struct UriQuery {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub uri: String,
    /// Milliseconds
    pub position: i64,
    pub duration: i64,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub removed: u64,
}

#[derive(Debug, Serialize)]
pub struct Roots {
    /// Registered shares
    pub shares: Vec<MediaRecord>,
    /// Indexed directories with no indexed parent
    pub directories: Vec<MediaRecord>,
}

#[derive(Debug, Serialize)]
pub struct SeriesDetails {
    pub series: Series,
    pub episodes: Vec<Episode>,
    pub banners: Vec<Banner>,
    pub actors: Vec<Actor>,
}

#[derive(Debug, Serialize)]
pub struct MovieDetails {
    pub movie: Movie,
    pub images: Vec<MovieImage>,
}

/// GET /media?uri=
async fn get_media(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UriQuery>,
) -> Result<Json<MediaRecord>, ApiError> {
    state
        .index
        .get(&query.uri)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(&query.uri))
}

/// GET /media/children?uri=
async fn get_children(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UriQuery>,
) -> Result<Json<Vec<MediaRecord>>, ApiError> {
    let children = state
        .index
        .children_of(&query.uri)
        .await
        .map_err(internal)?;
    Ok(Json(children))
}

/// GET /media/roots
async fn get_roots(State(state): State<Arc<AppState>>) -> Result<Json<Roots>, ApiError> {
    Ok(Json(Roots {
        shares: state.index.roots().await.map_err(internal)?,
        directories: state
            .index
            .top_level_indexed_directories()
            .await
            .map_err(internal)?,
    }))
}

/// GET /search?q=&limit=
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<MediaRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 500);
    let results = state
        .index
        .search(&query.q, limit)
        .await
        .map_err(internal)?;
    Ok(Json(results))
}

/// POST /media/progress
async fn save_progress(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProgressRequest>,
) -> Result<StatusCode, ApiError> {
    if req.position < 0 || req.duration < 0 {
        return Err((StatusCode::BAD_REQUEST, "negative position".to_string()));
    }

    let saved = state
        .index
        .save_progress(&req.uri, req.position, req.duration)
        .await
        .map_err(internal)?;
    if !saved {
        return Err(not_found(&req.uri));
    }

    state.index.notify(&req.uri);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /media/remove: forget everything below an item and mark it for rescanning
async fn remove_media(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UriQuery>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let record = state
        .index
        .get(&req.uri)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(&req.uri))?;

    let removed = state
        .jobs
        .scanner()
        .do_remove(&record)
        .await
        .map_err(internal)?;
    Ok(Json(RemoveResponse { removed }))
}

/// GET /metadata/series/:id
async fn get_series(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SeriesDetails>, ApiError> {
    let pool = state.index.pool();
    let series = metadata::get_series(pool, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("series {}", id)))?;

    Ok(Json(SeriesDetails {
        series,
        episodes: metadata::episodes_for_series(pool, id)
            .await
            .map_err(internal)?,
        banners: metadata::banners_for_series(pool, id)
            .await
            .map_err(internal)?,
        actors: metadata::actors_for_series(pool, id)
            .await
            .map_err(internal)?,
    }))
}

/// GET /metadata/movies/:id
async fn get_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<MovieDetails>, ApiError> {
    let pool = state.index.pool();
    let movie = metadata::get_movie(pool, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("movie {}", id)))?;

    Ok(Json(MovieDetails {
        movie,
        images: metadata::images_for_movie(pool, id)
            .await
            .map_err(internal)?,
    }))
}

/// GET /events: server-sent change notifications, one per changed URI
pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.index.subscribe()).filter_map(|change| match change {
        Ok(change) => Event::default()
            .event("media-changed")
            .json_data(&change)
            .ok()
            .map(Ok),
        // Lagged subscribers skip what they missed
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{send, test_state};
    use crate::models::{MediaCategory, MediaRecord, Series};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_media_and_children() {
        let state = test_state().await;
        let root = MediaRecord::new("file:///srv/films", None, MediaCategory::Directory, "films");
        let film = MediaRecord::new(
            "file:///srv/films/heat.mkv",
            Some(root.media_uri.clone()),
            MediaCategory::Movie,
            "heat.mkv",
        );
        state.index.upsert(&root).await.unwrap();
        state.index.upsert(&film).await.unwrap();

        let film_uri = "/media?uri=file%3A%2F%2F%2Fsrv%2Ffilms%2Fheat.mkv";
        let (status, body) = send(&state, "GET", film_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["category"], "movie");

        let (status, body) =
            send(&state, "GET", "/media/children?uri=file%3A%2F%2F%2Fsrv%2Ffilms", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&state, "GET", "/media/roots", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shares"].as_array().unwrap().len(), 1);

        let (status, _) = send(&state, "GET", "/media?uri=nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_progress() {
        let state = test_state().await;
        let film = MediaRecord::new(
            "file:///srv/films/heat.mkv",
            Some("file:///srv/films".into()),
            MediaCategory::Movie,
            "heat.mkv",
        );
        state.index.upsert(&film).await.unwrap();

        let (status, _) = send(
            &state,
            "POST",
            "/media/progress",
            Some(json!({"uri": film.media_uri, "position": 6000, "duration": 9000})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let stored = state.index.get(&film.media_uri).await.unwrap().unwrap();
        assert_eq!(stored.last_position, 6000);

        let (status, _) = send(
            &state,
            "POST",
            "/media/progress",
            Some(json!({"uri": "file:///gone.mkv", "position": 1, "duration": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_series_metadata() {
        let state = test_state().await;
        let (status, _) = send(&state, "GET", "/metadata/series/80348", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        crate::db::metadata::save_series_bundle(
            state.index.pool(),
            &crate::models::SeriesBundle {
                series: Series {
                    id: 80348,
                    name: "Chuck".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let (status, body) = send(&state, "GET", "/metadata/series/80348", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["series"]["name"], "Chuck");
        assert!(body["episodes"].as_array().unwrap().is_empty());
    }
}
