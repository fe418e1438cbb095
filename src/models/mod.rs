use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity a media record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    Unknown,
    Movie,
    TvSeries,
    TvEpisode,
    Directory,
    Video,
    Special,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Unknown => "unknown",
            MediaCategory::Movie => "movie",
            MediaCategory::TvSeries => "tv_series",
            MediaCategory::TvEpisode => "tv_episode",
            MediaCategory::Directory => "directory",
            MediaCategory::Video => "video",
            MediaCategory::Special => "special",
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, MediaCategory::Directory)
    }

    /// Categories that go through a metadata lookup after being indexed
    pub fn is_lookupable(&self) -> bool {
        matches!(
            self,
            MediaCategory::Movie | MediaCategory::TvEpisode | MediaCategory::Video
        )
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "unknown" => MediaCategory::Unknown,
            "movie" => MediaCategory::Movie,
            "tv_series" => MediaCategory::TvSeries,
            "tv_episode" => MediaCategory::TvEpisode,
            "directory" => MediaCategory::Directory,
            "video" => MediaCategory::Video,
            "special" => MediaCategory::Special,
            other => anyhow::bail!("unknown media category '{}'", other),
        })
    }
}

/// One discovered media entity, keyed by its source URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: i64,
    pub media_uri: String,
    pub parent_uri: Option<String>,
    pub category: MediaCategory,
    /// Raw share/filesystem name
    pub display_name: String,
    /// Title used for lookup matching; tracks the live name on rescans
    pub media_title: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub artwork_uri: Option<String>,
    pub backdrop_uri: Option<String>,
    pub is_indexed: bool,
    pub last_position: i64,
    pub duration: i64,
    pub file_size: Option<i64>,
    pub series_id: Option<i64>,
    pub episode_id: Option<i64>,
    pub movie_id: Option<i64>,
    pub created_at: Option<String>,
    /// Set by reconciliation when the stored row needs rewriting. Never persisted.
    #[serde(skip)]
    pub dirty: bool,
}

impl MediaRecord {
    pub fn new(
        media_uri: impl Into<String>,
        parent_uri: Option<String>,
        category: MediaCategory,
        display_name: impl Into<String>,
    ) -> Self {
        let display_name = display_name.into();
        Self {
            id: 0,
            media_uri: media_uri.into(),
            parent_uri,
            category,
            media_title: display_name.clone(),
            title: display_name.clone(),
            display_name,
            subtitle: None,
            artwork_uri: None,
            backdrop_uri: None,
            is_indexed: false,
            last_position: 0,
            duration: 0,
            file_size: None,
            series_id: None,
            episode_id: None,
            movie_id: None,
            created_at: None,
            dirty: false,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.category.is_directory()
    }
}

/// Row shape of the `media` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MediaRow {
    pub id: i64,
    pub media_uri: String,
    pub parent_uri: Option<String>,
    pub category: String,
    pub display_name: String,
    pub media_title: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub artwork_uri: Option<String>,
    pub backdrop_uri: Option<String>,
    pub is_indexed: bool,
    pub last_position: i64,
    pub duration: i64,
    pub file_size: Option<i64>,
    pub series_id: Option<i64>,
    pub episode_id: Option<i64>,
    pub movie_id: Option<i64>,
    pub created_at: String,
}

impl TryFrom<MediaRow> for MediaRecord {
    type Error = anyhow::Error;

    fn try_from(row: MediaRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            media_uri: row.media_uri,
            parent_uri: row.parent_uri,
            category: row.category.parse()?,
            display_name: row.display_name,
            media_title: row.media_title,
            title: row.title,
            subtitle: row.subtitle,
            artwork_uri: row.artwork_uri,
            backdrop_uri: row.backdrop_uri,
            is_indexed: row.is_indexed,
            last_position: row.last_position,
            duration: row.duration,
            file_size: row.file_size,
            series_id: row.series_id,
            episode_id: row.episode_id,
            movie_id: row.movie_id,
            created_at: Some(row.created_at),
            dirty: false,
        })
    }
}

/// Memoized mapping from a normalized query to an external id
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LookupAssociation {
    pub query: String,
    pub external_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Series {
    pub id: i64,
    pub name: String,
    pub overview: Option<String>,
    pub first_aired: Option<String>,
    pub network: Option<String>,
    pub genres: Option<String>,
    pub rating: Option<f64>,
    pub status: Option<String>,
    pub banner: Option<String>,
    pub fanart: Option<String>,
    pub poster: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Episode {
    pub id: i64,
    pub series_id: i64,
    pub season: i32,
    pub episode: i32,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub first_aired: Option<String>,
    pub rating: Option<f64>,
    pub still: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Banner {
    pub id: i64,
    pub series_id: i64,
    pub path: String,
    pub banner_type: Option<String>,
    pub banner_type2: Option<String>,
    pub language: Option<String>,
    pub rating: Option<f64>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Actor {
    pub id: i64,
    pub series_id: i64,
    pub name: String,
    pub role: Option<String>,
    pub image: Option<String>,
    pub sort_order: i32,
}

/// Everything fetched for one series in a single refresh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesBundle {
    pub series: Series,
    pub episodes: Vec<Episode>,
    pub banners: Vec<Banner>,
    pub actors: Vec<Actor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub original_title: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub runtime: Option<i32>,
    pub rating: Option<f64>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub imdb_id: Option<String>,
}

impl Movie {
    pub fn year(&self) -> Option<i32> {
        self.release_date
            .as_ref()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse().ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MovieImage {
    pub movie_id: i64,
    pub image_type: String,
    pub file_path: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub language: Option<String>,
    pub vote_average: Option<f64>,
}
