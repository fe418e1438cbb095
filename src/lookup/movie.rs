use std::sync::Arc;

use super::cache::AssociationCache;
use super::naming::{normalize_query, parse_movie_name};
use super::source::MovieSource;
use super::LookupError;
use crate::db::metadata;
use crate::index::MediaIndex;
use crate::models::{MediaRecord, Movie};

pub struct MovieLookup {
    index: MediaIndex,
    source: Arc<dyn MovieSource>,
    associations: Arc<AssociationCache>,
}

impl MovieLookup {
    pub fn new(
        index: MediaIndex,
        source: Arc<dyn MovieSource>,
        associations: Arc<AssociationCache>,
    ) -> Self {
        Self {
            index,
            source,
            associations,
        }
    }

    pub async fn lookup(&self, mut record: MediaRecord) -> Result<MediaRecord, LookupError> {
        let name = parse_movie_name(&record.media_title)
            .ok_or_else(|| LookupError::ExtractionFailed(record.media_title.clone()))?;
        let query = match name.year {
            Some(year) => normalize_query(&format!("{} {}", name.title, year)),
            None => normalize_query(&name.title),
        };

        let movie_id = match self.associations.get(&query).await? {
            Some(id) => id,
            None => {
                let id = self
                    .source
                    .search_movie(&name)
                    .await?
                    .ok_or_else(|| LookupError::NotFoundUpstream(name.title.clone()))?;
                self.associations.put(&query, id).await?;
                id
            }
        };

        let movie = self.load_movie(movie_id).await?;
        self.apply(&mut record, &movie);

        self.index.upsert(&record).await?;
        self.index.notify(&record.media_uri);

        tracing::debug!(
            "Matched {} to movie {} ({})",
            record.media_uri,
            movie.title,
            movie.id
        );

        Ok(record)
    }

    /// Local copy first, upstream only when the movie was never cached
    async fn load_movie(&self, movie_id: i64) -> Result<Movie, LookupError> {
        let pool = self.index.pool();
        if let Some(movie) = metadata::get_movie(pool, movie_id).await? {
            return Ok(movie);
        }

        let (movie, images) = self.source.fetch_movie(movie_id).await?;
        metadata::save_movie(pool, &movie, &images).await?;
        Ok(movie)
    }

    fn apply(&self, record: &mut MediaRecord, movie: &Movie) {
        record.title = movie.title.clone();
        record.subtitle = movie.year().map(|y| y.to_string());
        record.artwork_uri = movie
            .poster_path
            .as_deref()
            .map(|p| self.source.poster_url(p));
        record.backdrop_uri = movie
            .backdrop_path
            .as_deref()
            .map(|p| self.source.backdrop_url(p));
        record.movie_id = Some(movie.id);
        record.is_indexed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::lookup::cache::AssociationKind;
    use crate::lookup::naming::MovieName;
    use crate::models::{MediaCategory, MovieImage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeTmdb {
        searches: AtomicUsize,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl MovieSource for FakeTmdb {
        async fn search_movie(&self, name: &MovieName) -> Result<Option<i64>, LookupError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok((name.title == "The Matrix").then_some(603))
        }

        async fn fetch_movie(&self, id: i64) -> Result<(Movie, Vec<MovieImage>), LookupError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let movie = Movie {
                id,
                title: "The Matrix".to_string(),
                release_date: Some("1999-03-31".to_string()),
                poster_path: Some("/p.jpg".to_string()),
                ..Default::default()
            };
            Ok((movie, Vec::new()))
        }

        fn poster_url(&self, path: &str) -> String {
            format!("poster:{}", path)
        }

        fn backdrop_url(&self, path: &str) -> String {
            format!("backdrop:{}", path)
        }
    }

    async fn setup() -> (MovieLookup, Arc<FakeTmdb>, MediaIndex) {
        let pool = test_pool().await;
        let index = MediaIndex::new(pool.clone());
        let source = Arc::new(FakeTmdb::default());
        let cache = Arc::new(AssociationCache::new(AssociationKind::Movie, pool));
        let lookup = MovieLookup::new(index.clone(), source.clone(), cache);
        (lookup, source, index)
    }

    fn pending(name: &str) -> MediaRecord {
        MediaRecord::new(
            format!("file:///films/{}", name),
            Some("file:///films".to_string()),
            MediaCategory::Movie,
            name,
        )
    }

    #[tokio::test]
    async fn test_lookup_enriches_and_persists() {
        let (lookup, _, index) = setup().await;
        let record = pending("The.Matrix.1999.1080p.mkv");
        index.upsert(&record).await.unwrap();

        let found = lookup.lookup(record).await.unwrap();
        assert_eq!(found.title, "The Matrix");
        assert_eq!(found.subtitle.as_deref(), Some("1999"));
        assert_eq!(found.artwork_uri.as_deref(), Some("poster:/p.jpg"));
        assert_eq!(found.backdrop_uri, None);
        assert!(found.is_indexed);

        let stored = index.get(&found.media_uri).await.unwrap().unwrap();
        assert_eq!(stored.movie_id, Some(603));
        assert!(stored.is_indexed);
    }

    #[tokio::test]
    async fn test_second_lookup_hits_caches() {
        let (lookup, source, _) = setup().await;

        lookup
            .lookup(pending("The Matrix (1999).mkv"))
            .await
            .unwrap();
        lookup.lookup(pending("The.Matrix.1999.mkv")).await.unwrap();

        assert_eq!(source.searches.load(Ordering::SeqCst), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_movie_is_not_found() {
        let (lookup, _, index) = setup().await;
        let record = pending("Heat (1995).mkv");
        index.upsert(&record).await.unwrap();

        let err = lookup.lookup(record.clone()).await.unwrap_err();
        assert!(matches!(err, LookupError::NotFoundUpstream(_)));
        assert!(!index.get(&record.media_uri).await.unwrap().unwrap().is_indexed);
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_network() {
        let (lookup, source, _) = setup().await;

        let err = lookup.lookup(pending("1080p.mkv")).await.unwrap_err();
        assert!(matches!(err, LookupError::ExtractionFailed(_)));
        assert_eq!(source.searches.load(Ordering::SeqCst), 0);
    }
}
