// Scan jobs: background scans that can be inspected and cancelled as a unit

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ScanError, ScanMode, ScanReport, Scanner};
use crate::models::MediaRecord;

/// Finished jobs kept around for inspection
const MAX_FINISHED_JOBS: usize = 32;

#[derive(Debug, Clone)]
pub enum ScanTarget {
    Item(MediaRecord),
    /// Every share and top-level indexed directory
    Everything,
}

impl ScanTarget {
    fn describe(&self) -> String {
        match self {
            ScanTarget::Item(record) => record.media_uri.clone(),
            ScanTarget::Everything => "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed { report: ScanReport },
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub target: String,
    pub fail_fast: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobInfo {
    pub fn is_running(&self) -> bool {
        matches!(self.state, JobState::Running)
    }
}

struct JobEntry {
    info: JobInfo,
    cancel: CancellationToken,
}

pub struct ScanJobs {
    scanner: Arc<Scanner>,
    /// Parent of every job token; cancelled on shutdown
    shutdown: CancellationToken,
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
}

impl ScanJobs {
    pub fn new(scanner: Arc<Scanner>, shutdown: CancellationToken) -> Self {
        Self {
            scanner,
            shutdown,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn a scan and return its initial state
    pub fn start(self: &Arc<Self>, target: ScanTarget, mode: ScanMode) -> JobInfo {
        let id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        let info = JobInfo {
            id,
            target: target.describe(),
            fail_fast: mode == ScanMode::FailFast,
            started_at: Utc::now(),
            finished_at: None,
            state: JobState::Running,
        };

        self.lock().insert(
            id,
            JobEntry {
                info: info.clone(),
                cancel: cancel.clone(),
            },
        );
        tracing::info!("Scan job {} started for {}", id, info.target);

        let jobs = Arc::clone(self);
        tokio::spawn(async move {
            let result = match &target {
                ScanTarget::Item(record) => jobs.scanner.scan(record, mode, &cancel).await,
                ScanTarget::Everything => jobs.scanner.rescan_all(mode, &cancel).await,
            };
            jobs.finish(id, result);
        });

        info
    }

    fn finish(&self, id: Uuid, result: Result<ScanReport, ScanError>) {
        let state = match result {
            Ok(report) => JobState::Completed { report },
            Err(ScanError::Cancelled) => JobState::Cancelled,
            Err(e) => {
                tracing::error!("Scan job {} failed: {}", id, e);
                JobState::Failed {
                    error: e.to_string(),
                }
            }
        };

        let mut jobs = self.lock();
        if let Some(entry) = jobs.get_mut(&id) {
            entry.info.finished_at = Some(Utc::now());
            entry.info.state = state;
            tracing::info!("Scan job {} finished", id);
        }

        let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter_map(|e| e.info.finished_at.map(|at| (at, e.info.id)))
            .collect();
        if finished.len() > MAX_FINISHED_JOBS {
            finished.sort();
            for (_, old) in &finished[..finished.len() - MAX_FINISHED_JOBS] {
                jobs.remove(old);
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.lock().get(&id).map(|e| e.info.clone())
    }

    /// Newest first
    pub fn list(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self.lock().values().map(|e| e.info.clone()).collect();
        infos.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        infos
    }

    /// Returns false when the job is unknown or already finished
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.lock().get(&id) {
            Some(entry) if entry.info.is_running() => {
                entry.cancel.cancel();
                tracing::info!("Scan job {} cancellation requested", id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowseError, ShareBrowser, ShareEntry};
    use crate::db::test_pool;
    use crate::index::MediaIndex;
    use crate::lookup::{LookupError, MetadataLookup};
    use crate::scanner::ScanSettings;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Lists one empty directory, slowly for URIs containing "slow"
    struct QuietShare;

    #[async_trait]
    impl ShareBrowser for QuietShare {
        async fn list(&self, uri: &str) -> Result<Vec<ShareEntry>, BrowseError> {
            if uri.contains("slow") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(Vec::new())
        }
    }

    struct NoLookup;

    #[async_trait]
    impl MetadataLookup for NoLookup {
        async fn lookup(&self, record: MediaRecord) -> Result<MediaRecord, LookupError> {
            Err(LookupError::ExtractionFailed(record.media_title))
        }
    }

    async fn jobs() -> Arc<ScanJobs> {
        let index = MediaIndex::new(test_pool().await);
        let scanner = Scanner::new(
            index,
            Arc::new(QuietShare),
            Arc::new(NoLookup),
            &ScanSettings::default(),
        );
        Arc::new(ScanJobs::new(Arc::new(scanner), CancellationToken::new()))
    }

    async fn wait_until_done(jobs: &ScanJobs, id: Uuid) -> JobInfo {
        for _ in 0..500 {
            if let Some(info) = jobs.get(id).filter(|i| !i.is_running()) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scan job {} never finished", id);
    }

    #[tokio::test]
    async fn test_job_completes_with_report() {
        let jobs = jobs().await;
        let root = jobs
            .scanner()
            .add_root("smb://nas/media", "media")
            .await
            .unwrap();

        let started = jobs.start(ScanTarget::Item(root), ScanMode::FailFast);
        assert!(started.is_running());

        let done = wait_until_done(&jobs, started.id).await;
        assert!(done.finished_at.is_some());
        match done.state {
            JobState::Completed { report } => assert_eq!(report.directories, 1),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!jobs.cancel(started.id));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let jobs = jobs().await;
        let root = jobs
            .scanner()
            .add_root("smb://nas/slow", "slow")
            .await
            .unwrap();

        let started = jobs.start(ScanTarget::Item(root), ScanMode::Isolated);
        assert!(jobs.cancel(started.id));

        let done = wait_until_done(&jobs, started.id).await;
        assert!(matches!(done.state, JobState::Cancelled));
        assert_eq!(jobs.list().len(), 1);
    }

    #[tokio::test]
    async fn test_unscannable_target_fails() {
        let jobs = jobs().await;
        let special = MediaRecord::new(
            "smb://nas/media/Extras/x.mkv",
            None,
            crate::models::MediaCategory::Special,
            "x.mkv",
        );

        let started = jobs.start(ScanTarget::Item(special), ScanMode::FailFast);
        let done = wait_until_done(&jobs, started.id).await;
        assert!(matches!(done.state, JobState::Failed { .. }));
        assert!(jobs.get(Uuid::new_v4()).is_none());
    }
}
