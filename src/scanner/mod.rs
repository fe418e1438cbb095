// Share scanner: walks directories, reconciles them with the index and
// dispatches metadata lookups for new videos

pub mod jobs;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowseError, ShareBrowser, ShareEntry};
use crate::index::{IndexError, MediaIndex, UpsertOutcome};
use crate::lookup::naming::{extension_of, parse_episode_name, parse_movie_name};
use crate::lookup::{LookupError, MetadataLookup};
use crate::models::{MediaCategory, MediaRecord};

pub use jobs::{JobInfo, ScanJobs, ScanTarget};

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "m2ts", "vob",
    "divx", "3gp", "ogv",
];

/// Folders whose videos are extras rather than episodes or features
const SPECIAL_FOLDER_NAMES: &[&str] = &[
    "nced",
    "ncop",
    "creditless",
    "extras",
    "extra",
    "bonus",
    "specials",
    "behind the scenes",
    "deleted scenes",
    "interviews",
    "featurettes",
    "trailers",
    "sample",
    "samples",
];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("share unreachable: {0}")]
    ShareUnreachable(#[from] BrowseError),
    #[error("listing {0} timed out")]
    Timeout(String),
    #[error("cannot scan {uri}: {category} items are not scannable")]
    UnsupportedCategory {
        uri: String,
        category: MediaCategory,
    },
    #[error("scan cancelled")]
    Cancelled,
    #[error("index error: {0}")]
    Storage(#[from] IndexError),
    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupError),
}

/// How subtree failures propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// User-initiated: the first error aborts the whole scan
    FailFast,
    /// Scheduled: a failing subtree is recorded and its siblings continue
    Isolated,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanReport {
    pub directories: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub removed: u64,
    pub lookups_succeeded: usize,
    pub lookups_failed: usize,
    pub errors: Vec<String>,
}

impl ScanReport {
    fn record_upsert(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub enumerate_timeout: Duration,
    pub worker_pool_size: usize,
    pub video_extensions: Vec<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            enumerate_timeout: Duration::from_secs(45),
            worker_pool_size: 16,
            video_extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Decides the category of a live entry; `None` means "do not index"
pub struct Classifier {
    video_extensions: HashSet<String>,
}

impl Classifier {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            video_extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    fn is_video(&self, entry: &ShareEntry) -> bool {
        [extension_of(&entry.name), extension_of(&entry.uri)]
            .into_iter()
            .flatten()
            .any(|ext| self.video_extensions.contains(&ext))
    }

    pub fn classify(&self, entry: &ShareEntry, parent_name: &str) -> Option<MediaCategory> {
        if entry.is_directory {
            return Some(MediaCategory::Directory);
        }
        if !self.is_video(entry) {
            return None;
        }

        let lower = entry.name.to_lowercase();
        if SPECIAL_FOLDER_NAMES.contains(&parent_name.to_lowercase().as_str())
            || lower.contains("-sample.")
            || lower.starts_with("sample.")
        {
            return Some(MediaCategory::Special);
        }

        if parse_episode_name(&entry.name).is_some() {
            Some(MediaCategory::TvEpisode)
        } else if parse_movie_name(&entry.name).is_some_and(|m| m.year.is_some()) {
            Some(MediaCategory::Movie)
        } else {
            Some(MediaCategory::Video)
        }
    }
}

/// Match live children against stored ones.
///
/// Stored records whose media title still equals the live name come back
/// untouched. A renamed record comes back dirty with its titles updated:
/// directories (and files that never got metadata) take the live name as
/// title, enriched files keep theirs. Unknown entries are classified and
/// come back dirty with `id == 0`; entries the classifier rejects are dropped.
/// New specials come back already indexed.
pub fn reconcile<F>(
    live: &[ShareEntry],
    existing: Vec<MediaRecord>,
    parent_uri: &str,
    classify: F,
) -> Vec<MediaRecord>
where
    F: Fn(&ShareEntry) -> Option<MediaCategory>,
{
    let mut stored: HashMap<String, MediaRecord> = existing
        .into_iter()
        .map(|r| (r.media_uri.clone(), r))
        .collect();

    live.iter()
        .filter_map(|entry| match stored.remove(&entry.uri) {
            Some(mut record) => {
                let renamed = record.media_title != entry.name;
                let resized = entry.size.is_some() && entry.size != record.file_size;
                if !renamed && !resized {
                    return Some(record);
                }
                if renamed {
                    if record.is_directory() || !record.is_indexed {
                        record.title = entry.name.clone();
                    }
                    record.display_name = entry.name.clone();
                    record.media_title = entry.name.clone();
                }
                record.file_size = entry.size.or(record.file_size);
                record.dirty = true;
                Some(record)
            }
            None => {
                let category = classify(entry)?;
                let mut record = MediaRecord::new(
                    entry.uri.clone(),
                    Some(parent_uri.to_string()),
                    category,
                    entry.name.clone(),
                );
                record.file_size = entry.size;
                // Extras are never looked up, so they are complete as listed
                record.is_indexed = category == MediaCategory::Special;
                record.dirty = true;
                Some(record)
            }
        })
        .collect()
}

/// Directories from `candidates` that are not below another candidate,
/// first occurrence wins for duplicate URIs
fn outermost(candidates: Vec<MediaRecord>) -> Vec<MediaRecord> {
    let uris: HashSet<String> = candidates
        .iter()
        .filter(|c| c.is_directory())
        .map(|c| c.media_uri.clone())
        .collect();
    let mut seen = HashSet::new();

    candidates
        .into_iter()
        .filter(|c| c.is_directory())
        .filter(|c| !uris.iter().any(|other| is_below(&c.media_uri, other)))
        .filter(|c| seen.insert(c.media_uri.clone()))
        .collect()
}

fn is_below(uri: &str, ancestor: &str) -> bool {
    uri.strip_prefix(ancestor.trim_end_matches('/'))
        .is_some_and(|rest| rest.starts_with('/'))
}

pub struct Scanner {
    index: MediaIndex,
    browser: Arc<dyn ShareBrowser>,
    lookup: Arc<dyn MetadataLookup>,
    workers: Arc<Semaphore>,
    enumerate_timeout: Duration,
    classifier: Classifier,
}

impl Scanner {
    pub fn new(
        index: MediaIndex,
        browser: Arc<dyn ShareBrowser>,
        lookup: Arc<dyn MetadataLookup>,
        settings: &ScanSettings,
    ) -> Self {
        Self {
            index,
            browser,
            lookup,
            workers: Arc::new(Semaphore::new(settings.worker_pool_size.max(1))),
            enumerate_timeout: settings.enumerate_timeout,
            classifier: Classifier::new(&settings.video_extensions),
        }
    }

    pub fn index(&self) -> &MediaIndex {
        &self.index
    }

    /// Scan one item: directories are walked, videos are looked up
    pub async fn scan(
        &self,
        item: &MediaRecord,
        mode: ScanMode,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let mut report = ScanReport::default();

        if item.is_directory() {
            tracing::info!("Scanning {}", item.media_uri);
            self.scan_directory(item, mode, cancel, &mut report).await?;
            tracing::info!(
                "Scan of {} complete in {:?}: {} directories, {} added, {} updated, {} removed, {} lookups ok, {} failed",
                item.media_uri,
                started.elapsed(),
                report.directories,
                report.inserted,
                report.updated,
                report.removed,
                report.lookups_succeeded,
                report.lookups_failed
            );
        } else if item.category.is_lookupable() {
            self.lookup_video(item, mode, &mut report).await?;
        } else {
            return Err(ScanError::UnsupportedCategory {
                uri: item.media_uri.clone(),
                category: item.category,
            });
        }

        Ok(report)
    }

    async fn lookup_video(
        &self,
        item: &MediaRecord,
        mode: ScanMode,
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        let _permit = self.workers.acquire().await.ok();
        match self.lookup.lookup(item.clone()).await {
            Ok(_) => report.lookups_succeeded += 1,
            Err(e) if mode == ScanMode::FailFast => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Lookup failed for {}: {}", item.media_uri, e);
                report.lookups_failed += 1;
                report.errors.push(format!("{}: {}", item.media_uri, e));
            }
        }
        Ok(())
    }

    async fn enumerate(
        &self,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ShareEntry>, ScanError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
            listed = tokio::time::timeout(self.enumerate_timeout, self.browser.list(uri)) => {
                match listed {
                    Ok(entries) => Ok(entries?),
                    Err(_) => Err(ScanError::Timeout(uri.to_string())),
                }
            }
        }
    }

    /// Enumerate, reconcile, recurse and look up, then drop orphans and mark
    /// the directory indexed
    pub async fn scan_directory(
        &self,
        dir: &MediaRecord,
        mode: ScanMode,
        cancel: &CancellationToken,
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        let mut visited = HashSet::new();
        self.walk(dir, mode, cancel, report, &mut visited).await
    }

    /// One directory of a pass. `visited` holds every directory this pass has
    /// entered; each is walked at most once, so each video is looked up at
    /// most once per pass.
    async fn walk(
        &self,
        dir: &MediaRecord,
        mode: ScanMode,
        cancel: &CancellationToken,
        report: &mut ScanReport,
        visited: &mut HashSet<String>,
    ) -> Result<(), ScanError> {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if !visited.insert(dir.media_uri.clone()) {
            tracing::debug!("Already scanned {} in this pass", dir.media_uri);
            return Ok(());
        }

        let uri = dir.media_uri.as_str();
        let live = self.enumerate(uri, cancel).await?;
        let existing = self.index.children_of(uri).await?;

        let parent_name = dir.display_name.clone();
        let children = reconcile(&live, existing, uri, |entry| {
            self.classifier.classify(entry, &parent_name)
        });

        for child in children.iter().filter(|c| c.dirty) {
            report.record_upsert(self.index.upsert(child).await?);
        }

        // Lookups run beside the walk; siblings are not held up by them
        let mut lookups = JoinSet::new();
        for child in children
            .iter()
            .filter(|c| c.category.is_lookupable() && !c.is_indexed)
        {
            let lookup = self.lookup.clone();
            let workers = self.workers.clone();
            let record = child.clone();
            lookups.spawn(async move {
                let _permit = workers.acquire_owned().await.ok();
                let uri = record.media_uri.clone();
                (uri, lookup.lookup(record).await)
            });
        }

        for child in children.iter().filter(|c| c.is_directory()) {
            match Box::pin(self.walk(child, mode, cancel, report, visited)).await {
                Ok(()) => {}
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(e) if mode == ScanMode::FailFast => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", child.media_uri, e);
                    report.errors.push(format!("{}: {}", child.media_uri, e));
                }
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    lookups.abort_all();
                    return Err(ScanError::Cancelled);
                }
                next = lookups.join_next() => match next {
                    None => break,
                    Some(Ok((_, Ok(_)))) => report.lookups_succeeded += 1,
                    Some(Ok((uri, Err(e)))) => {
                        match e {
                            LookupError::ExtractionFailed(_)
                            | LookupError::NotFoundUpstream(_)
                            | LookupError::Unavailable(_) => {
                                tracing::debug!("No metadata for {}: {}", uri, e)
                            }
                            _ => tracing::warn!("Lookup failed for {}: {}", uri, e),
                        }
                        report.lookups_failed += 1;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Lookup task failed: {}", e);
                        report.lookups_failed += 1;
                    }
                },
            }
        }

        let observed: HashSet<String> = live.into_iter().map(|e| e.uri).collect();
        report.removed += self.index.remove_orphans(uri, &observed).await?;

        if !dir.is_indexed && !self.index.set_indexed(uri, true).await? {
            let mut stored = dir.clone();
            stored.is_indexed = true;
            self.index.upsert(&stored).await?;
        }
        self.index.notify(uri);
        report.directories += 1;

        Ok(())
    }

    /// Every share root plus every top-level indexed directory, minus those
    /// that sit inside another target
    pub async fn rescan_all(
        &self,
        mode: ScanMode,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let mut candidates = self.index.roots().await?;
        candidates.extend(self.index.top_level_indexed_directories().await?);
        let targets = outermost(candidates);

        let started = Instant::now();
        let mut report = ScanReport::default();
        let mut visited = HashSet::new();
        tracing::info!("Rescanning {} top-level directories", targets.len());

        for target in &targets {
            match self
                .walk(target, mode, cancel, &mut report, &mut visited)
                .await
            {
                Ok(()) => {}
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(e) if mode == ScanMode::FailFast => return Err(e),
                Err(e) => {
                    tracing::error!("Rescan of {} failed: {}", target.media_uri, e);
                    report.errors.push(format!("{}: {}", target.media_uri, e));
                }
            }
        }

        tracing::info!(
            "Rescan complete in {:?}: {} directories, {} added, {} updated, {} removed, {} errors",
            started.elapsed(),
            report.directories,
            report.inserted,
            report.updated,
            report.removed,
            report.errors.len()
        );

        Ok(report)
    }

    /// Register a share root. Existing roots are returned as stored.
    pub async fn add_root(&self, uri: &str, name: &str) -> Result<MediaRecord, ScanError> {
        if let Some(existing) = self.index.get(uri).await? {
            return Ok(existing);
        }

        let record = MediaRecord::new(uri, None, MediaCategory::Directory, name);
        self.index.upsert(&record).await?;
        self.index.notify(uri);
        tracing::info!("Registered share {} ({})", name, uri);

        Ok(self.index.get(uri).await?.unwrap_or(record))
    }

    /// Forget everything below `item`, then put it back unindexed so the next
    /// scan picks it up again
    pub async fn do_remove(&self, item: &MediaRecord) -> Result<u64, ScanError> {
        let removed = self.index.delete_tree(&item.media_uri).await?;

        let mut fresh = item.clone();
        fresh.id = 0;
        fresh.is_indexed = false;
        fresh.dirty = false;
        self.index.upsert(&fresh).await?;
        self.index.notify(&item.media_uri);

        tracing::info!("Removed {} records under {}", removed, item.media_uri);
        Ok(removed)
    }
}
