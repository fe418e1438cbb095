//! Metadata lookups for indexed videos.
//!
//! Each lookup derives a query from the record's media title, resolves it to
//! an upstream id through the association cache (network search only on a
//! full miss), loads the metadata from the local cache or upstream, and
//! writes the enriched record back to the index with `is_indexed` set.
//! A failed lookup leaves the record unindexed so the next scan retries it.

pub mod cache;
pub mod movie;
pub mod naming;
pub mod source;
pub mod tv;

use async_trait::async_trait;
use thiserror::Error;

use crate::index::IndexError;
use crate::models::{MediaCategory, MediaRecord};

pub use movie::MovieLookup;
pub use tv::TvLookup;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("could not derive a lookup key from '{0}'")]
    ExtractionFailed(String),
    #[error("no upstream match for '{0}'")]
    NotFoundUpstream(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("no {0} provider configured")]
    Unavailable(&'static str),
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}

impl LookupError {
    /// Classify a failed upstream call, looking through its context chain
    pub fn from_upstream(err: anyhow::Error) -> Self {
        let timed_out = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(|e| e.is_timeout());
        if timed_out {
            LookupError::Timeout
        } else {
            LookupError::Network(format!("{:#}", err))
        }
    }
}

impl From<anyhow::Error> for LookupError {
    fn from(err: anyhow::Error) -> Self {
        LookupError::Storage(err)
    }
}

impl From<sqlx::Error> for LookupError {
    fn from(err: sqlx::Error) -> Self {
        LookupError::Storage(err.into())
    }
}

impl From<IndexError> for LookupError {
    fn from(err: IndexError) -> Self {
        LookupError::Storage(err.into())
    }
}

/// Enrich one pending record with remote metadata
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup(&self, record: MediaRecord) -> Result<MediaRecord, LookupError>;
}

/// Routes records to the TV or movie client by category. A client is
/// absent when its provider has no API key.
pub struct LookupService {
    movies: Option<MovieLookup>,
    tv: Option<TvLookup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Tv,
    Movie,
}

fn route(record: &MediaRecord) -> Option<Route> {
    match record.category {
        MediaCategory::TvEpisode => Some(Route::Tv),
        MediaCategory::Movie => Some(Route::Movie),
        MediaCategory::Video => {
            if naming::parse_episode_name(&record.media_title).is_some() {
                Some(Route::Tv)
            } else {
                Some(Route::Movie)
            }
        }
        _ => None,
    }
}

impl LookupService {
    pub fn new(movies: Option<MovieLookup>, tv: Option<TvLookup>) -> Self {
        Self { movies, tv }
    }
}

#[async_trait]
impl MetadataLookup for LookupService {
    async fn lookup(&self, record: MediaRecord) -> Result<MediaRecord, LookupError> {
        match route(&record) {
            Some(Route::Tv) => match &self.tv {
                Some(tv) => tv.lookup(record).await,
                None => Err(LookupError::Unavailable("TV")),
            },
            Some(Route::Movie) => match &self.movies {
                Some(movies) => movies.lookup(record).await,
                None => Err(LookupError::Unavailable("movie")),
            },
            None => Err(LookupError::ExtractionFailed(record.display_name)),
        }
    }
}
