// TMDB metadata provider service (movies)
// API Documentation: https://developer.themoviedb.org/reference/intro/getting-started

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::rate_limit::RateGate;
use crate::lookup::naming::MovieName;
use crate::lookup::source::MovieSource;
use crate::lookup::LookupError;
use crate::models::{Movie, MovieImage};

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

/// TMDB API client
pub struct TmdbClient {
    client: Client,
    api_key: String,
    language: String,
    gate: Arc<RateGate>,
}

/// Search result for movies
#[derive(Debug, Deserialize)]
pub struct MovieSearchResults {
    pub results: Vec<MovieSearchResult>,
    pub total_results: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovieSearchResult {
    pub id: i64,
    pub title: String,
    pub original_title: Option<String>,
    pub release_date: Option<String>,
}

impl MovieSearchResult {
    fn year(&self) -> Option<i32> {
        self.release_date
            .as_ref()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse().ok())
    }
}

/// Detailed movie info with images appended
#[derive(Debug, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    pub original_title: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub vote_average: Option<f64>,
    pub runtime: Option<i32>,
    pub imdb_id: Option<String>,
    pub images: Option<ImageSet>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageSet {
    #[serde(default)]
    pub posters: Vec<ImageInfo>,
    #[serde(default)]
    pub backdrops: Vec<ImageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ImageInfo {
    pub file_path: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub iso_639_1: Option<String>,
    pub vote_average: Option<f64>,
}

/// Image sizes for different purposes
#[derive(Debug, Clone, Copy)]
pub enum ImageSize {
    /// w342 - medium poster
    Poster,
    /// w1280 - large backdrop
    Backdrop,
}

impl ImageSize {
    fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Poster => "w342",
            ImageSize::Backdrop => "w1280",
        }
    }
}

pub fn image_url(path: &str, size: ImageSize) -> String {
    format!("{}/{}{}", TMDB_IMAGE_BASE, size.as_str(), path)
}

impl TmdbClient {
    pub fn new(api_key: String, language: String, timeout: Duration, gate: Arc<RateGate>) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key,
            language,
            gate,
        }
    }

    /// Search for movies by name
    pub async fn search_movies(
        &self,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<MovieSearchResult>> {
        let mut url = format!(
            "{}/search/movie?api_key={}&language={}&query={}&include_adult=false",
            TMDB_API_BASE,
            self.api_key,
            self.language,
            urlencoding::encode(query)
        );

        if let Some(y) = year {
            url.push_str(&format!("&year={}", y));
        }

        self.gate.acquire().await;
        let response: MovieSearchResults = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to search TMDB for movies")?
            .error_for_status()
            .context("TMDB movie search failed")?
            .json()
            .await
            .context("Failed to parse TMDB movie search response")?;

        tracing::debug!(
            "TMDB search '{}' ({:?}): {} results",
            query,
            year,
            response.total_results
        );

        Ok(response.results)
    }

    /// Get detailed movie info including its image list
    pub async fn movie_details(&self, tmdb_id: i64) -> Result<MovieDetails> {
        let url = format!(
            "{}/movie/{}?api_key={}&language={}&append_to_response=images&include_image_language={},null",
            TMDB_API_BASE, tmdb_id, self.api_key, self.language, self.language
        );

        self.gate.acquire().await;
        let response: MovieDetails = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to get TMDB movie details")?
            .error_for_status()
            .context("TMDB movie details failed")?
            .json()
            .await
            .context("Failed to parse TMDB movie details response")?;

        Ok(response)
    }
}

impl MovieDetails {
    /// Split into the cached movie row and its image rows
    pub fn into_movie(self) -> (Movie, Vec<MovieImage>) {
        let movie_id = self.id;
        let images = self.images.unwrap_or_default();
        let to_rows = |kind: &'static str, list: Vec<ImageInfo>| {
            list.into_iter().map(move |img| MovieImage {
                movie_id,
                image_type: kind.to_string(),
                file_path: img.file_path,
                width: img.width,
                height: img.height,
                language: img.iso_639_1,
                vote_average: img.vote_average,
            })
        };
        let rows = to_rows("poster", images.posters)
            .chain(to_rows("backdrop", images.backdrops))
            .collect();

        let movie = Movie {
            id: self.id,
            title: self.title,
            original_title: self.original_title,
            overview: self.overview,
            release_date: self.release_date,
            runtime: self.runtime,
            rating: self.vote_average,
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            imdb_id: self.imdb_id,
        };
        (movie, rows)
    }
}

fn clean_title(title: &str) -> String {
    title
        .to_lowercase()
        .trim_end_matches(|c: char| c == ')' || c.is_ascii_digit() || c == '(' || c == ' ')
        .trim()
        .to_string()
}

fn close_substring(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() || !(a.contains(b) || b.contains(a)) {
        return false;
    }
    let shorter = a.len().min(b.len());
    let longer = a.len().max(b.len());
    shorter as f64 / longer as f64 > 0.4
}

/// Whether a search hit plausibly refers to the queried title
pub fn title_matches(query: &str, result: &MovieSearchResult) -> bool {
    let query = clean_title(query);
    let title = clean_title(&result.title);
    let original = clean_title(result.original_title.as_deref().unwrap_or(""));

    if title == query || original == query {
        return true;
    }
    if close_substring(&title, &query) || close_substring(&original, &query) {
        return true;
    }

    let query_words: HashSet<&str> = query.split_whitespace().collect();
    let title_words: HashSet<&str> = title.split_whitespace().collect();
    if query_words.is_empty() || title_words.is_empty() {
        return false;
    }
    let common = query_words.intersection(&title_words).count();
    let ratio = common as f64 / query_words.len().min(title_words.len()) as f64;
    ratio >= 0.6 || (common >= 2 && ratio >= 0.4)
}

/// Pick the first validated hit, preferring one released in the requested year
pub fn best_match<'a>(
    name: &MovieName,
    results: &'a [MovieSearchResult],
) -> Option<&'a MovieSearchResult> {
    let mut candidates = results.iter().filter(|r| title_matches(&name.title, r));
    match name.year {
        Some(year) => results
            .iter()
            .find(|r| r.year() == Some(year) && title_matches(&name.title, r))
            .or_else(|| candidates.next()),
        None => candidates.next(),
    }
}

#[async_trait]
impl MovieSource for TmdbClient {
    async fn search_movie(&self, name: &MovieName) -> Result<Option<i64>, LookupError> {
        let mut results = self.search_movies(&name.title, name.year)
            .await
            .map_err(LookupError::from_upstream)?;

        // A wrong year in the file name should not hide the movie
        if results.is_empty() && name.year.is_some() {
            results = self.search_movies(&name.title, None)
                .await
                .map_err(LookupError::from_upstream)?;
        }

        match best_match(name, &results) {
            Some(hit) => Ok(Some(hit.id)),
            None => {
                tracing::debug!(
                    "TMDB returned {} results for '{}' but none matched well enough",
                    results.len(),
                    name.title
                );
                Ok(None)
            }
        }
    }

    async fn fetch_movie(&self, id: i64) -> Result<(Movie, Vec<MovieImage>), LookupError> {
        let details = self
            .movie_details(id)
            .await
            .map_err(LookupError::from_upstream)?;
        Ok(details.into_movie())
    }

    fn poster_url(&self, path: &str) -> String {
        image_url(path, ImageSize::Poster)
    }

    fn backdrop_url(&self, path: &str) -> String {
        image_url(path, ImageSize::Backdrop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, title: &str, date: &str) -> MovieSearchResult {
        MovieSearchResult {
            id,
            title: title.to_string(),
            original_title: None,
            release_date: Some(date.to_string()),
        }
    }

    #[test]
    fn test_image_url() {
        assert_eq!(
            image_url("/abc.jpg", ImageSize::Poster),
            "https://image.tmdb.org/t/p/w342/abc.jpg"
        );
        assert_eq!(
            image_url("/abc.jpg", ImageSize::Backdrop),
            "https://image.tmdb.org/t/p/w1280/abc.jpg"
        );
    }

    #[test]
    fn test_title_matching() {
        assert!(title_matches("The Matrix", &hit(1, "The Matrix", "1999-03-31")));
        assert!(title_matches("matrix", &hit(1, "The Matrix", "1999-03-31")));
        assert!(title_matches(
            "Lord of the Rings Fellowship",
            &hit(1, "The Lord of the Rings: The Fellowship of the Ring", "2001-12-18")
        ));
        assert!(!title_matches("Heat", &hit(2, "The Matrix", "1999-03-31")));
    }

    #[test]
    fn test_best_match_prefers_year() {
        let results = vec![
            hit(10, "Dune", "2021-09-15"),
            hit(11, "Dune", "1984-12-14"),
            hit(12, "Dune Drifter", "2020-01-01"),
        ];
        let name = MovieName {
            title: "Dune".to_string(),
            year: Some(1984),
        };
        assert_eq!(best_match(&name, &results).map(|r| r.id), Some(11));

        let name = MovieName {
            title: "Dune".to_string(),
            year: None,
        };
        assert_eq!(best_match(&name, &results).map(|r| r.id), Some(10));

        let name = MovieName {
            title: "Arrival".to_string(),
            year: None,
        };
        assert!(best_match(&name, &results).is_none());
    }

    #[test]
    fn test_details_parse_with_images() {
        let json = r#"{
            "id": 603,
            "title": "The Matrix",
            "release_date": "1999-03-31",
            "runtime": 136,
            "vote_average": 8.2,
            "poster_path": "/p.jpg",
            "backdrop_path": "/b.jpg",
            "imdb_id": "tt0133093",
            "images": {
                "posters": [{"file_path": "/p.jpg", "width": 1000, "height": 1500, "iso_639_1": "en", "vote_average": 5.5}],
                "backdrops": [{"file_path": "/b.jpg", "width": 1920, "height": 1080, "iso_639_1": null}]
            }
        }"#;
        let details: MovieDetails = serde_json::from_str(json).unwrap();
        let (movie, images) = details.into_movie();

        assert_eq!(movie.id, 603);
        assert_eq!(movie.year(), Some(1999));
        assert_eq!(movie.runtime, Some(136));
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].image_type, "poster");
        assert_eq!(images[1].image_type, "backdrop");
        assert_eq!(images[1].language, None);
    }
}
