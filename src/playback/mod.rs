//! Playback queue: the siblings of the item being played plus a cursor.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::index::{IndexError, MediaIndex};
use crate::models::MediaRecord;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no media indexed at {0}")]
    NotFound(String),
    #[error("{0} is a directory")]
    NotPlayable(String),
    #[error("index error: {0}")]
    Storage(#[from] IndexError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    /// Fresh on every load; never matches an item from an earlier load
    pub id: Uuid,
    pub record: MediaRecord,
}

#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: Vec<QueueItem>,
    cursor: usize,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue with the playable siblings of `uri`, cursor on `uri`
    pub async fn load_from_uri(
        &mut self,
        index: &MediaIndex,
        uri: &str,
    ) -> Result<&QueueItem, PlaybackError> {
        let record = index
            .get(uri)
            .await?
            .ok_or_else(|| PlaybackError::NotFound(uri.to_string()))?;
        if record.is_directory() {
            return Err(PlaybackError::NotPlayable(uri.to_string()));
        }

        let siblings = match record.parent_uri.as_deref() {
            Some(parent) => index.children_of(parent).await?,
            None => Vec::new(),
        };
        let mut records: Vec<MediaRecord> =
            siblings.into_iter().filter(|r| !r.is_directory()).collect();

        // Listing raced with a removal or the item is a root
        let cursor = match records.iter().position(|r| r.media_uri == uri) {
            Some(pos) => pos,
            None => {
                records = vec![record];
                0
            }
        };

        self.items = records
            .into_iter()
            .map(|record| QueueItem {
                id: Uuid::new_v4(),
                record,
            })
            .collect();
        self.cursor = cursor;

        tracing::debug!(
            "Loaded playback queue of {} items at position {}",
            self.items.len(),
            cursor
        );

        Ok(&self.items[cursor])
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.items.get(self.cursor)
    }

    /// Advance; at the end the cursor stays put
    pub fn next(&mut self) -> Option<&QueueItem> {
        if self.cursor + 1 >= self.items.len() {
            return None;
        }
        self.cursor += 1;
        self.items.get(self.cursor)
    }

    /// Step back; at the start the cursor stays put
    pub fn previous(&mut self) -> Option<&QueueItem> {
        if self.cursor == 0 || self.items.is_empty() {
            return None;
        }
        self.cursor -= 1;
        self.items.get(self.cursor)
    }

    pub fn move_to_item(&mut self, id: Uuid) -> Option<&QueueItem> {
        let pos = self.items.iter().position(|item| item.id == id)?;
        self.cursor = pos;
        self.items.get(pos)
    }

    /// Up next: the current item and everything after it
    pub fn queue_view(&self) -> &[QueueItem] {
        self.items.get(self.cursor..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::MediaCategory;

    async fn season() -> MediaIndex {
        let index = MediaIndex::new(test_pool().await);
        let dir = "file:///tv/Lost/Season 1";
        index
            .upsert(&MediaRecord::new(dir, None, MediaCategory::Directory, "Season 1"))
            .await
            .unwrap();
        for name in ["Lost S01E01.mkv", "Lost S01E02.mkv", "Extras", "Lost S01E03.mkv"] {
            let category = if name == "Extras" {
                MediaCategory::Directory
            } else {
                MediaCategory::TvEpisode
            };
            let record = MediaRecord::new(
                format!("{}/{}", dir, name),
                Some(dir.to_string()),
                category,
                name,
            );
            index.upsert(&record).await.unwrap();
        }
        index
    }

    fn uri(name: &str) -> String {
        format!("file:///tv/Lost/Season 1/{}", name)
    }

    #[tokio::test]
    async fn test_load_positions_cursor() {
        let index = season().await;
        let mut queue = PlaybackQueue::new();

        let current = queue
            .load_from_uri(&index, &uri("Lost S01E02.mkv"))
            .await
            .unwrap();
        assert_eq!(current.record.display_name, "Lost S01E02.mkv");

        // Directories never enter the queue
        assert_eq!(queue.len(), 3);
        let view: Vec<_> = queue
            .queue_view()
            .iter()
            .map(|i| i.record.display_name.as_str())
            .collect();
        assert_eq!(view, vec!["Lost S01E02.mkv", "Lost S01E03.mkv"]);
    }

    #[tokio::test]
    async fn test_next_and_previous_do_not_wrap() {
        let index = season().await;
        let mut queue = PlaybackQueue::new();
        queue
            .load_from_uri(&index, &uri("Lost S01E03.mkv"))
            .await
            .unwrap();

        assert!(queue.next().is_none());
        assert_eq!(
            queue.current().unwrap().record.display_name,
            "Lost S01E03.mkv"
        );

        assert_eq!(
            queue.previous().unwrap().record.display_name,
            "Lost S01E02.mkv"
        );
        assert_eq!(
            queue.previous().unwrap().record.display_name,
            "Lost S01E01.mkv"
        );
        assert!(queue.previous().is_none());
        assert_eq!(
            queue.current().unwrap().record.display_name,
            "Lost S01E01.mkv"
        );
        assert_eq!(queue.queue_view().len(), 3);
    }

    #[tokio::test]
    async fn test_move_to_item_uses_current_load_ids() {
        let index = season().await;
        let mut queue = PlaybackQueue::new();
        queue
            .load_from_uri(&index, &uri("Lost S01E01.mkv"))
            .await
            .unwrap();
        let third = queue.queue_view()[2].id;

        assert_eq!(
            queue.move_to_item(third).unwrap().record.display_name,
            "Lost S01E03.mkv"
        );

        queue
            .load_from_uri(&index, &uri("Lost S01E01.mkv"))
            .await
            .unwrap();
        assert!(queue.move_to_item(third).is_none());
        assert_eq!(
            queue.current().unwrap().record.display_name,
            "Lost S01E01.mkv"
        );
    }

    #[tokio::test]
    async fn test_load_errors() {
        let index = season().await;
        let mut queue = PlaybackQueue::new();

        let err = queue
            .load_from_uri(&index, "file:///nowhere.mkv")
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(_)));

        let err = queue
            .load_from_uri(&index, &uri("Extras"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::NotPlayable(_)));
        assert!(queue.is_empty());
        assert!(queue.current().is_none());
        assert!(queue.queue_view().is_empty());
    }
}
