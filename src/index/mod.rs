//! Media index store: one row per discovered item, keyed by source URI, with
//! parent links forming a forest of directories.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::db::prepare_fts_query;
use crate::models::{MediaCategory, MediaRecord, MediaRow};
use crate::tree::{build_forest, Node};

const CHANGE_BUS_CAPACITY: usize = 256;

const MEDIA_COLUMNS: &str = "id, media_uri, parent_uri, category, display_name, media_title, \
     title, subtitle, artwork_uri, backdrop_uri, is_indexed, last_position, duration, \
     file_size, series_id, episode_id, movie_id, created_at";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt media row: {0}")]
    CorruptRow(anyhow::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Updated,
    Inserted,
    /// Lost an insert race against another writer; nothing was written
    Skipped,
}

/// Published whenever the stored state under a URI changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaChange {
    pub uri: String,
}

#[derive(Clone)]
pub struct MediaIndex {
    pool: SqlitePool,
    changes: broadcast::Sender<MediaChange>,
}

fn into_records(rows: Vec<MediaRow>) -> IndexResult<Vec<MediaRecord>> {
    rows.into_iter()
        .map(|row| MediaRecord::try_from(row).map_err(IndexError::CorruptRow))
        .collect()
}

impl MediaIndex {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get(&self, uri: &str) -> IndexResult<Option<MediaRecord>> {
        let row: Option<MediaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM media WHERE media_uri = ?",
            MEDIA_COLUMNS
        ))
        .bind(uri)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MediaRecord::try_from)
            .transpose()
            .map_err(IndexError::CorruptRow)
    }

    /// Update in place when the URI is known, insert otherwise.
    /// Category, playback position and duration are never touched by an update.
    pub async fn upsert(&self, record: &MediaRecord) -> IndexResult<UpsertOutcome> {
        let result = sqlx::query(
            r#"UPDATE media SET
                parent_uri = ?,
                display_name = ?,
                media_title = ?,
                title = ?,
                subtitle = ?,
                artwork_uri = ?,
                backdrop_uri = ?,
                is_indexed = ?,
                series_id = ?,
                episode_id = ?,
                movie_id = ?,
                file_size = COALESCE(?, file_size)
               WHERE media_uri = ?"#,
        )
        .bind(&record.parent_uri)
        .bind(&record.display_name)
        .bind(&record.media_title)
        .bind(&record.title)
        .bind(&record.subtitle)
        .bind(&record.artwork_uri)
        .bind(&record.backdrop_uri)
        .bind(record.is_indexed)
        .bind(record.series_id)
        .bind(record.episode_id)
        .bind(record.movie_id)
        .bind(record.file_size)
        .bind(&record.media_uri)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(UpsertOutcome::Updated);
        }

        self.insert(record).await
    }

    async fn insert(&self, record: &MediaRecord) -> IndexResult<UpsertOutcome> {
        let result = sqlx::query(
            r#"INSERT INTO media
               (media_uri, parent_uri, category, display_name, media_title, title, subtitle,
                artwork_uri, backdrop_uri, is_indexed, last_position, duration, file_size,
                series_id, episode_id, movie_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.media_uri)
        .bind(&record.parent_uri)
        .bind(record.category.as_str())
        .bind(&record.display_name)
        .bind(&record.media_title)
        .bind(&record.title)
        .bind(&record.subtitle)
        .bind(&record.artwork_uri)
        .bind(&record.backdrop_uri)
        .bind(record.is_indexed)
        .bind(record.last_position)
        .bind(record.duration)
        .bind(record.file_size)
        .bind(record.series_id)
        .bind(record.episode_id)
        .bind(record.movie_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(UpsertOutcome::Inserted),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tracing::warn!(
                    "Skipping insert of {}: already present ({})",
                    record.media_uri,
                    e
                );
                Ok(UpsertOutcome::Skipped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Children of a directory, ordered by display name (case-insensitive)
    pub async fn children_of(&self, parent_uri: &str) -> IndexResult<Vec<MediaRecord>> {
        let rows: Vec<MediaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM media WHERE parent_uri = ? ORDER BY display_name COLLATE NOCASE, id",
            MEDIA_COLUMNS
        ))
        .bind(parent_uri)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    pub async fn by_category(&self, category: MediaCategory) -> IndexResult<Vec<MediaRecord>> {
        let rows: Vec<MediaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM media WHERE category = ? ORDER BY display_name COLLATE NOCASE, id",
            MEDIA_COLUMNS
        ))
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    /// Registered share roots (no parent), indexed or not
    pub async fn roots(&self) -> IndexResult<Vec<MediaRecord>> {
        let rows: Vec<MediaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM media WHERE parent_uri IS NULL ORDER BY display_name COLLATE NOCASE, id",
            MEDIA_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    /// Prefix match over titles and display names, best matches first
    pub async fn search(&self, query: &str, limit: i64) -> IndexResult<Vec<MediaRecord>> {
        let fts_query = prepare_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let columns = MEDIA_COLUMNS
            .split(", ")
            .map(|c| format!("m.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");

        let rows: Vec<MediaRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM media_search s
               JOIN media m ON m.id = s.rowid
               WHERE media_search MATCH ?
               ORDER BY bm25(media_search)
               LIMIT ?"#,
            columns
        ))
        .bind(&fts_query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn indexed_directories(&self) -> IndexResult<Vec<MediaRecord>> {
        let rows: Vec<MediaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM media WHERE category = ? AND is_indexed = 1 ORDER BY id",
            MEDIA_COLUMNS
        ))
        .bind(MediaCategory::Directory.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    /// Indexed directories arranged by parent link. A directory whose parent
    /// is not itself an indexed directory is a root of this forest.
    pub async fn indexed_directory_forest(&self) -> IndexResult<Vec<Node<String>>> {
        let dirs = self.indexed_directories().await?;
        Ok(build_forest(
            dirs.into_iter().map(|d| (d.parent_uri, d.media_uri)),
        ))
    }

    pub async fn top_level_indexed_directories(&self) -> IndexResult<Vec<MediaRecord>> {
        let dirs = self.indexed_directories().await?;
        let edges = dirs
            .iter()
            .map(|d| (d.parent_uri.clone(), d.media_uri.clone()));
        let forest = build_forest(edges);

        let mut by_uri: HashMap<String, MediaRecord> = dirs
            .into_iter()
            .map(|d| (d.media_uri.clone(), d))
            .collect();

        let mut tops: Vec<MediaRecord> = forest
            .iter()
            .filter_map(|root| by_uri.remove(&root.value))
            .collect();
        tops.sort_by_key(|r| r.display_name.to_lowercase());

        Ok(tops)
    }

    /// Remove a single row
    pub async fn delete(&self, record: &MediaRecord) -> IndexResult<u64> {
        let result = sqlx::query("DELETE FROM media WHERE media_uri = ?")
            .bind(&record.media_uri)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remove a record and everything below it: files first, then
    /// sub-directories bottom-up, then the record itself
    pub async fn delete_tree(&self, uri: &str) -> IndexResult<u64> {
        let children = self.children_of(uri).await?;
        let (dirs, files): (Vec<_>, Vec<_>) = children
            .into_iter()
            .filter(|c| c.media_uri != uri)
            .partition(|c| c.is_directory());

        let mut removed = 0;
        for file in &files {
            removed += self.delete(file).await?;
        }
        for dir in &dirs {
            removed += Box::pin(self.delete_tree(&dir.media_uri)).await?;
        }

        let result = sqlx::query("DELETE FROM media WHERE media_uri = ?")
            .bind(uri)
            .execute(&self.pool)
            .await?;
        removed += result.rows_affected();

        if removed > 0 {
            self.notify(uri);
        }
        Ok(removed)
    }

    /// Delete stored children of `parent_uri` that were not observed live
    pub async fn remove_orphans(
        &self,
        parent_uri: &str,
        observed: &HashSet<String>,
    ) -> IndexResult<u64> {
        let stored = self.children_of(parent_uri).await?;
        let mut removed = 0;

        for orphan in stored.iter().filter(|c| !observed.contains(&c.media_uri)) {
            tracing::debug!("Removing orphan {}", orphan.media_uri);
            removed += self.delete_tree(&orphan.media_uri).await?;
        }

        Ok(removed)
    }

    pub async fn set_indexed(&self, uri: &str, indexed: bool) -> IndexResult<bool> {
        let result = sqlx::query("UPDATE media SET is_indexed = ? WHERE media_uri = ?")
            .bind(indexed)
            .bind(uri)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn save_progress(
        &self,
        uri: &str,
        position: i64,
        duration: i64,
    ) -> IndexResult<bool> {
        let result =
            sqlx::query("UPDATE media SET last_position = ?, duration = ? WHERE media_uri = ?")
                .bind(position)
                .bind(duration)
                .bind(uri)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Register for change notifications. Dropping the receiver unregisters.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaChange> {
        self.changes.subscribe()
    }

    pub fn notify(&self, uri: &str) {
        // No subscribers is not an error
        let _ = self.changes.send(MediaChange {
            uri: uri.to_string(),
        });
    }
}
