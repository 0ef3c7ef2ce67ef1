//! Grab and poll flows over Download rows.
//!
//! The orchestrator owns the lifecycle between "a release was chosen" and
//! "files are on disk, ready to import": it hands the NZB link to the
//! active backend, tracks backend state into the downloads table, and
//! enqueues the import job when a download completes.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::activity::ActivityLog;
use crate::db::{
    ActivityKind, Database, DbDownload, DbDownloadClient, DbPathMapping, DbRelease, DownloadStatus,
};
use crate::download::{client_for, DownloadClient, DownloadClientError, EnqueueMeta};
use crate::jobs::{JobPayload, JobQueue, JobQueueError};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("download client error: {0}")]
    Client(#[from] DownloadClientError),
    #[error("job queue error: {0}")]
    Queue(#[from] JobQueueError),
}

/// How a grab request resolved
#[derive(Debug, Clone, PartialEq)]
pub enum GrabOutcome {
    Started { download_id: String },
    /// The book already has an in-flight download; grabbing again is a no-op
    AlreadyDownloading,
    /// Fatal configuration gap, reported as an error activity, never retried
    NoClientConfigured,
}

/// One poll sweep's bookkeeping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSummary {
    pub checked: usize,
    pub updated: usize,
}

#[derive(Clone)]
pub struct DownloadOrchestrator {
    database: Database,
    activity: ActivityLog,
    jobs: JobQueue,
}

impl DownloadOrchestrator {
    pub fn new(database: Database, activity: ActivityLog, jobs: JobQueue) -> Self {
        Self {
            database,
            activity,
            jobs,
        }
    }

    /// Send a chosen release to the active download backend
    pub async fn grab_release(&self, release: &DbRelease) -> Result<GrabOutcome, OrchestratorError> {
        let Some(config) = self.database.get_active_download_client().await? else {
            warn!("Download: no download client configured, cannot grab");
            self.activity
                .error(
                    Some(&release.book_id),
                    &format!(
                        "No download client is configured; cannot grab '{}'",
                        release.title
                    ),
                )
                .await;
            return Ok(GrabOutcome::NoClientConfigured);
        };

        let client = client_for(&config);
        self.grab_with_client(release, &config, client.as_ref())
            .await
    }

    pub(crate) async fn grab_with_client(
        &self,
        release: &DbRelease,
        config: &DbDownloadClient,
        client: &dyn DownloadClient,
    ) -> Result<GrabOutcome, OrchestratorError> {
        if self.database.has_active_download(&release.book_id).await? {
            info!(
                "Download: book {} already has an active download, skipping grab",
                release.book_id
            );
            return Ok(GrabOutcome::AlreadyDownloading);
        }

        let meta = EnqueueMeta {
            title: release.title.clone(),
            category: None,
        };
        let backend_item_id = client.enqueue(&release.link, &meta).await?;

        let download = DbDownload::new(&release.book_id, &config.id, &backend_item_id);
        self.database.add_download(&download).await?;

        self.activity
            .record(
                ActivityKind::Grabbed,
                Some(&release.book_id),
                &format!("Grabbed '{}' for download", release.title),
            )
            .await;
        info!(
            "Download: grabbed '{}' as backend item {} on {}",
            release.title, backend_item_id, config.name
        );

        self.jobs.enqueue(&JobPayload::PollDownloads).await?;

        Ok(GrabOutcome::Started {
            download_id: download.id,
        })
    }

    /// Reconcile every in-flight download against the backend
    pub async fn poll_downloads(&self) -> Result<PollSummary, OrchestratorError> {
        let Some(config) = self.database.get_active_download_client().await? else {
            debug!("Download: poll skipped, no download client configured");
            return Ok(PollSummary::default());
        };
        let client = client_for(&config);
        self.poll_with_client(client.as_ref()).await
    }

    pub(crate) async fn poll_with_client(
        &self,
        client: &dyn DownloadClient,
    ) -> Result<PollSummary, OrchestratorError> {
        let active = self.database.get_active_downloads().await?;
        let mappings = self.database.get_path_mappings().await?;
        let mut summary = PollSummary::default();

        // Sequential on purpose: polling hammers one backend, and its own
        // rate limits prefer serialized calls
        for download in dedupe_by_backend_item(active) {
            summary.checked += 1;

            let Some(backend_item_id) = download.backend_item_id.clone() else {
                continue;
            };

            let backend = match client.status(&backend_item_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "Download: status check failed for {}: {}",
                        backend_item_id, e
                    );
                    continue;
                }
            };

            let mapped_path = backend
                .output_path
                .as_deref()
                .map(|path| apply_path_mappings(path, &mappings));

            let has_new_path = match (&mapped_path, &download.output_path) {
                (Some(new), Some(old)) => new != old,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if backend.status == download.status && !has_new_path {
                continue;
            }

            let output_path = mapped_path.as_deref().or(download.output_path.as_deref());
            let error = backend.error.as_deref().or(download.error.as_deref());

            // Duplicate rows sharing the backend id converge together here
            let touched = self
                .database
                .update_download_by_backend_item(&backend_item_id, backend.status, output_path, error)
                .await?;
            if touched == 0 {
                self.database
                    .update_download(&download.id, backend.status, output_path, error)
                    .await?;
            }
            summary.updated += 1;

            match backend.status {
                DownloadStatus::Completed => {
                    info!(
                        "Download: {} completed, output {:?}",
                        download.id, output_path
                    );
                    self.jobs
                        .enqueue(&JobPayload::ImportDownload {
                            download_id: download.id.clone(),
                        })
                        .await?;
                }
                DownloadStatus::Failed => {
                    let reason = backend.error.as_deref().unwrap_or("unknown error");
                    warn!("Download: {} failed: {}", download.id, reason);
                    self.activity
                        .record(
                            ActivityKind::DownloadFailed,
                            Some(&download.book_id),
                            &format!("Download failed: {}", reason),
                        )
                        .await;
                }
                _ => {}
            }
        }

        debug!(
            "Download: poll checked {} item(s), updated {}",
            summary.checked, summary.updated
        );
        Ok(summary)
    }
}

/// Keep the newest row per backend item id; rows without one pass through.
/// Duplicates appear when a grab races a poll, and the newest row is the
/// authoritative record.
fn dedupe_by_backend_item(downloads: Vec<DbDownload>) -> Vec<DbDownload> {
    let mut by_backend: HashMap<String, DbDownload> = HashMap::new();
    let mut without_backend = Vec::new();

    // Input is ordered oldest first, so later inserts win
    for download in downloads {
        match download.backend_item_id.clone() {
            Some(key) => {
                by_backend.insert(key, download);
            }
            None => without_backend.push(download),
        }
    }

    let mut result: Vec<DbDownload> = by_backend.into_values().chain(without_backend).collect();
    result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    result
}

/// Translate a backend-reported path into the importer's filesystem view.
/// The longest matching remote prefix wins; no match leaves the path as-is.
pub fn apply_path_mappings(path: &str, mappings: &[DbPathMapping]) -> String {
    let best = mappings
        .iter()
        .filter(|m| path.starts_with(&m.remote_prefix))
        .max_by_key(|m| m.remote_prefix.len());

    match best {
        Some(mapping) => format!(
            "{}{}",
            mapping.local_prefix,
            &path[mapping.remote_prefix.len()..]
        ),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::db::DbBook;
    use crate::download::BackendStatus;
    use crate::test_support::MockDownloadBackend;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, DownloadOrchestrator, Database, DbBook, DbRelease) {
        let temp = TempDir::new().expect("temp dir");
        let db_path = temp.path().join("test.db");
        let database = Database::new(db_path.to_str().unwrap())
            .await
            .expect("create database");

        let book = DbBook::new("ol-dune", "Dune", &["Frank Herbert".to_string()], &[])
            .expect("book");
        database.add_book(&book).await.expect("add book");

        let release = DbRelease::new(
            &book.id,
            "idx-1",
            "guid-1",
            "Dune - Frank Herbert EPUB",
            "https://idx.example/get/1",
            Some(1_000_000),
            1.05,
        );
        database.upsert_release(&release).await.expect("release");

        let activity = ActivityLog::new(database.clone());
        let jobs = JobQueue::new(database.clone(), RetryPolicy::default());
        let orchestrator = DownloadOrchestrator::new(database.clone(), activity, jobs);

        (temp, orchestrator, database, book, release)
    }

    fn sab_config() -> DbDownloadClient {
        DbDownloadClient::new("sab", crate::db::DownloadClientKind::Sabnzbd, "http://sab:8080")
    }

    #[tokio::test]
    async fn test_grab_creates_download_and_schedules_poll() {
        let (_temp, orchestrator, database, book, release) = setup().await;

        let mock = MockDownloadBackend::new();
        mock.next_enqueue_id("nzo-1");

        let outcome = orchestrator
            .grab_with_client(&release, &sab_config(), &mock)
            .await
            .expect("grab");

        let GrabOutcome::Started { download_id } = outcome else {
            panic!("expected Started, got {:?}", outcome);
        };

        let download = database
            .get_download(&download_id)
            .await
            .expect("query")
            .expect("download row");
        assert_eq!(download.backend_item_id.as_deref(), Some("nzo-1"));
        assert_eq!(download.status, DownloadStatus::Downloading);
        assert_eq!(download.book_id, book.id);

        // A poll job is due immediately
        let due = database
            .get_due_jobs(chrono::Utc::now(), 10)
            .await
            .expect("jobs");
        assert!(due.iter().any(|j| j.job_type == "poll-downloads"));
    }

    #[tokio::test]
    async fn test_grab_is_noop_while_download_in_flight() {
        let (_temp, orchestrator, database, book, release) = setup().await;

        let existing = DbDownload::new(&book.id, "client-1", "nzo-existing");
        database.add_download(&existing).await.expect("add");

        let mock = MockDownloadBackend::new();
        let outcome = orchestrator
            .grab_with_client(&release, &sab_config(), &mock)
            .await
            .expect("grab");

        assert_eq!(outcome, GrabOutcome::AlreadyDownloading);
        assert_eq!(mock.enqueue_count(), 0);
    }

    #[tokio::test]
    async fn test_grab_without_client_is_config_fatal() {
        let (_temp, orchestrator, database, book, release) = setup().await;

        let outcome = orchestrator.grab_release(&release).await.expect("grab");
        assert_eq!(outcome, GrabOutcome::NoClientConfigured);

        let events = database.recent_activity(10).await.expect("activity");
        assert!(events
            .iter()
            .any(|e| e.kind == ActivityKind::Error && e.book_id.as_deref() == Some(book.id.as_str())));

        // No download row, no jobs: the condition is not retryable
        let due = database
            .get_due_jobs(chrono::Utc::now(), 10)
            .await
            .expect("jobs");
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_poll_applies_mapping_and_enqueues_import() {
        let (_temp, orchestrator, database, book, _release) = setup().await;

        database
            .add_path_mapping(&DbPathMapping::new("/downloads", "/mnt/media"))
            .await
            .expect("mapping");

        let download = DbDownload::new(&book.id, "client-1", "nzo-1");
        database.add_download(&download).await.expect("add");

        let mock = MockDownloadBackend::new();
        mock.set_status(
            "nzo-1",
            BackendStatus {
                status: DownloadStatus::Completed,
                output_path: Some("/downloads/complete/Dune".to_string()),
                error: None,
            },
        );

        let summary = orchestrator.poll_with_client(&mock).await.expect("poll");
        assert_eq!(summary, PollSummary { checked: 1, updated: 1 });

        let updated = database
            .get_download(&download.id)
            .await
            .expect("query")
            .expect("row");
        assert_eq!(updated.status, DownloadStatus::Completed);
        assert_eq!(updated.output_path.as_deref(), Some("/mnt/media/complete/Dune"));

        let due = database
            .get_due_jobs(chrono::Utc::now(), 10)
            .await
            .expect("jobs");
        assert!(due.iter().any(|j| j.job_type == "import-download"
            && j.payload.contains(&download.id)));
    }

    #[tokio::test]
    async fn test_poll_skips_unchanged_status() {
        let (_temp, orchestrator, database, book, _release) = setup().await;

        let download = DbDownload::new(&book.id, "client-1", "nzo-1");
        database.add_download(&download).await.expect("add");

        let mock = MockDownloadBackend::new();
        mock.set_status(
            "nzo-1",
            BackendStatus {
                status: DownloadStatus::Downloading,
                output_path: None,
                error: None,
            },
        );

        // Row is already `downloading` with no path: nothing to write
        let summary = orchestrator.poll_with_client(&mock).await.expect("poll");
        assert_eq!(summary, PollSummary { checked: 1, updated: 0 });

        let second = orchestrator.poll_with_client(&mock).await.expect("poll");
        assert_eq!(second.updated, 0);
    }

    #[tokio::test]
    async fn test_poll_dedupes_rows_sharing_backend_item() {
        let (_temp, orchestrator, database, book, _release) = setup().await;

        database
            .add_download(&DbDownload::new(&book.id, "client-1", "nzo-dup"))
            .await
            .expect("add first");
        database
            .add_download(&DbDownload::new(&book.id, "client-1", "nzo-dup"))
            .await
            .expect("add second");

        let mock = MockDownloadBackend::new();
        mock.set_status(
            "nzo-dup",
            BackendStatus {
                status: DownloadStatus::Downloading,
                output_path: None,
                error: None,
            },
        );

        let summary = orchestrator.poll_with_client(&mock).await.expect("poll");
        assert_eq!(summary.checked, 1);
        assert_eq!(mock.status_call_count(), 1);
    }

    #[tokio::test]
    async fn test_poll_failure_emits_activity() {
        let (_temp, orchestrator, database, book, _release) = setup().await;

        let download = DbDownload::new(&book.id, "client-1", "nzo-1");
        database.add_download(&download).await.expect("add");

        let mock = MockDownloadBackend::new();
        mock.set_status(
            "nzo-1",
            BackendStatus {
                status: DownloadStatus::Failed,
                output_path: None,
                error: Some("Out of retention".to_string()),
            },
        );

        orchestrator.poll_with_client(&mock).await.expect("poll");

        let row = database
            .get_download(&download.id)
            .await
            .expect("query")
            .expect("row");
        assert_eq!(row.status, DownloadStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("Out of retention"));

        let events = database.recent_activity(10).await.expect("activity");
        assert!(events
            .iter()
            .any(|e| e.kind == ActivityKind::DownloadFailed
                && e.message.contains("Out of retention")));
    }

    #[test]
    fn test_longest_prefix_mapping_wins() {
        let mappings = vec![
            DbPathMapping::new("/downloads", "/mnt/media"),
            DbPathMapping::new("/downloads/complete", "/mnt/finished"),
        ];

        assert_eq!(
            apply_path_mappings("/downloads/complete/Dune", &mappings),
            "/mnt/finished/Dune"
        );
        assert_eq!(
            apply_path_mappings("/downloads/incomplete/Dune", &mappings),
            "/mnt/media/incomplete/Dune"
        );
        assert_eq!(
            apply_path_mappings("/elsewhere/Dune", &mappings),
            "/elsewhere/Dune"
        );
    }
}
