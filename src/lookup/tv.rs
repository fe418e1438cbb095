use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::cache::AssociationCache;
use super::naming::{normalize_query, parse_episode_name, EpisodeName};
use super::source::SeriesSource;
use super::LookupError;
use crate::db::metadata;
use crate::index::MediaIndex;
use crate::models::{Episode, MediaRecord, Series};

pub struct TvLookup {
    index: MediaIndex,
    source: Arc<dyn SeriesSource>,
    associations: Arc<AssociationCache>,
    /// Series invalidated by the updates feed, computed once per process
    stale: OnceCell<HashSet<i64>>,
}

impl TvLookup {
    pub fn new(
        index: MediaIndex,
        source: Arc<dyn SeriesSource>,
        associations: Arc<AssociationCache>,
    ) -> Self {
        Self {
            index,
            source,
            associations,
            stale: OnceCell::new(),
        }
    }

    pub async fn lookup(&self, mut record: MediaRecord) -> Result<MediaRecord, LookupError> {
        let name = parse_episode_name(&record.media_title)
            .ok_or_else(|| LookupError::ExtractionFailed(record.media_title.clone()))?;

        self.refresh_from_updates().await;

        let query = normalize_query(&name.show);
        let series_id = match self.associations.get(&query).await? {
            Some(id) => id,
            None => {
                let id = self
                    .source
                    .search_series(&name.show)
                    .await?
                    .ok_or_else(|| LookupError::NotFoundUpstream(name.show.clone()))?;
                self.associations.put(&query, id).await?;
                id
            }
        };

        let (series, episode) = self.resolve_episode(series_id, &name).await?;
        self.apply(&mut record, &series, &episode);

        self.index.upsert(&record).await?;
        self.index.notify(&record.media_uri);

        tracing::debug!(
            "Matched {} to {} S{:02}E{:02} ({})",
            record.media_uri,
            series.name,
            episode.season,
            episode.episode,
            episode.id
        );

        Ok(record)
    }

    /// Consult the updates feed once per process. Cached series reported as
    /// changed are dropped so their next lookup goes upstream.
    async fn refresh_from_updates(&self) -> &HashSet<i64> {
        self.stale
            .get_or_init(|| async {
                match self.invalidate_updated().await {
                    Ok(stale) => stale,
                    Err(e) => {
                        tracing::warn!("TheTVDB update check failed, trusting cache: {}", e);
                        HashSet::new()
                    }
                }
            })
            .await
    }

    async fn invalidate_updated(&self) -> Result<HashSet<i64>, LookupError> {
        let pool = self.index.pool();
        let since = metadata::last_update_time(pool).await?;
        let updates = self.source.updates_since(since).await?;

        let reported: HashSet<i64> = updates.series.into_iter().collect();
        let stale: HashSet<i64> = metadata::cached_series_ids(pool)
            .await?
            .into_iter()
            .filter(|id| reported.contains(id))
            .collect();

        for id in &stale {
            metadata::forget_series(pool, *id).await?;
            self.associations.invalidate_id(*id).await?;
        }
        metadata::set_last_update_time(pool, updates.time).await?;

        tracing::info!(
            "TheTVDB updates since {:?}: {} series changed, {} cached copies dropped",
            since,
            reported.len(),
            stale.len()
        );

        Ok(stale)
    }

    async fn fetch_and_cache(&self, series_id: i64) -> Result<Series, LookupError> {
        let bundle = self.source.fetch_series(series_id).await?;
        metadata::save_series_bundle(self.index.pool(), &bundle).await?;
        Ok(bundle.series)
    }

    /// Episode from the cached bundle; a cache miss or a missing episode
    /// refetches the series once
    async fn resolve_episode(
        &self,
        series_id: i64,
        name: &EpisodeName,
    ) -> Result<(Series, Episode), LookupError> {
        let pool = self.index.pool();

        let (mut series, mut fetched) = match metadata::get_series(pool, series_id).await? {
            Some(series) => (series, false),
            None => (self.fetch_and_cache(series_id).await?, true),
        };

        loop {
            if let Some(episode) =
                metadata::find_episode(pool, series_id, name.season, name.episode).await?
            {
                return Ok((series, episode));
            }
            if fetched {
                return Err(LookupError::NotFoundUpstream(format!(
                    "{} S{:02}E{:02}",
                    name.show, name.season, name.episode
                )));
            }
            series = self.fetch_and_cache(series_id).await?;
            fetched = true;
        }
    }

    fn apply(&self, record: &mut MediaRecord, series: &Series, episode: &Episode) {
        record.title = episode
            .name
            .clone()
            .unwrap_or_else(|| format!("Episode {}", episode.episode));
        record.subtitle = Some(format!(
            "{} S{:02}E{:02}",
            series.name, episode.season, episode.episode
        ));
        record.artwork_uri = series
            .poster
            .as_deref()
            .or(episode.still.as_deref())
            .map(|p| self.source.banner_url(p));
        record.backdrop_uri = series.fanart.as_deref().map(|p| self.source.banner_url(p));
        record.series_id = Some(series.id);
        record.episode_id = Some(episode.id);
        record.is_indexed = true;
    }
}
