//! Upstream metadata sources behind the lookup clients.
//!
//! The lookup logic depends on these traits rather than on the HTTP clients,
//! so tests can drive it with in-memory fakes.

use async_trait::async_trait;

use super::naming::MovieName;
use super::LookupError;
use crate::models::{Movie, MovieImage, SeriesBundle};

/// Series changed upstream since some point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesUpdates {
    /// Server time to resume from on the next check
    pub time: i64,
    pub series: Vec<i64>,
}

#[async_trait]
pub trait MovieSource: Send + Sync {
    /// Best matching upstream id for a parsed movie name, if any
    async fn search_movie(&self, name: &MovieName) -> Result<Option<i64>, LookupError>;

    async fn fetch_movie(&self, id: i64) -> Result<(Movie, Vec<MovieImage>), LookupError>;

    fn poster_url(&self, path: &str) -> String;

    fn backdrop_url(&self, path: &str) -> String;
}

#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn search_series(&self, show: &str) -> Result<Option<i64>, LookupError>;

    /// Series record plus all episodes, banners and actors
    async fn fetch_series(&self, id: i64) -> Result<SeriesBundle, LookupError>;

    /// `None` asks for the current server time only
    async fn updates_since(&self, since: Option<i64>) -> Result<SeriesUpdates, LookupError>;

    fn banner_url(&self, path: &str) -> String;
}
