use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::activity::ActivityLog;
use crate::config::CoreConfig;
use crate::db::{ActivityKind, BookState, Database};
use crate::download::{DownloadOrchestrator, GrabOutcome};
use crate::importer::{ImportError, Importer};
use crate::jobs::payload::JobPayload;
use crate::jobs::queue::JobQueue;
use crate::jobs::runner::{Dispatch, DispatchOutcome};
use crate::rate_limit::RateLimiter;
use crate::search::{SearchAggregator, SearchError};

/// Production dispatcher: routes each payload to the owning service and
/// translates its result into a dispatch outcome.
///
/// The rule of thumb for outcome mapping: a result that can change without
/// anyone touching configuration (network hiccup, busy backend) retries;
/// one that cannot (missing row, nothing configured, no importable files)
/// fails for good. An empty search result is an answer, not a failure;
/// the recurring search job covers the "try again later" case.
pub struct JobDispatcher {
    database: Database,
    aggregator: SearchAggregator,
    orchestrator: DownloadOrchestrator,
    importer: Importer,
    activity: ActivityLog,
    queue: JobQueue,
}

impl JobDispatcher {
    /// Wire the whole pipeline over one database handle
    pub fn new(database: Database, config: &CoreConfig) -> Self {
        let activity = ActivityLog::new(database.clone());
        let limiter = Arc::new(RateLimiter::new());
        let aggregator =
            SearchAggregator::new(database.clone(), limiter, config.indexer_timeout);
        let queue = JobQueue::new(database.clone(), config.retry);
        let orchestrator =
            DownloadOrchestrator::new(database.clone(), activity.clone(), queue.clone());
        let importer = Importer::new(
            database.clone(),
            activity.clone(),
            config.library_root.clone(),
        );

        Self {
            database,
            aggregator,
            orchestrator,
            importer,
            activity,
            queue,
        }
    }

    async fn search_book(&self, book_id: &str) -> DispatchOutcome {
        let book = match self.database.get_book(book_id).await {
            Ok(Some(book)) => book,
            Ok(None) => return DispatchOutcome::Fatal(format!("book {} not found", book_id)),
            Err(e) => return DispatchOutcome::Retry(format!("database error: {}", e)),
        };
        if book.state == BookState::Available {
            // Raced with an import; nothing left to find
            return DispatchOutcome::Succeeded;
        }

        match self.aggregator.search_book(&book).await {
            Ok(release) => {
                info!(
                    "Jobs: search matched '{}' for '{}', scheduling grab",
                    release.title, book.title
                );
                let enqueue = self
                    .queue
                    .enqueue(&JobPayload::GrabRelease {
                        release_id: release.id.clone(),
                    })
                    .await;
                match enqueue {
                    Ok(_) => DispatchOutcome::Succeeded,
                    Err(e) => DispatchOutcome::Retry(format!("failed to schedule grab: {}", e)),
                }
            }
            Err(SearchError::NoMatch { failures }) => {
                let detail = if failures.is_empty() {
                    String::new()
                } else {
                    format!(" ({} indexer queries also failed)", failures.len())
                };
                self.activity
                    .record(
                        ActivityKind::SearchFailed,
                        Some(&book.id),
                        &format!("No release matched '{}'{}", book.title, detail),
                    )
                    .await;
                DispatchOutcome::Succeeded
            }
            Err(SearchError::AllIndexersFailed { failures }) => {
                let reasons = failures
                    .iter()
                    .map(|f| format!("{}: {}", f.indexer_name, f.reason))
                    .collect::<Vec<_>>()
                    .join("; ");
                self.activity
                    .record(
                        ActivityKind::SearchFailed,
                        Some(&book.id),
                        &format!("Every indexer failed searching '{}': {}", book.title, reasons),
                    )
                    .await;
                DispatchOutcome::Retry(format!("all indexers failed: {}", reasons))
            }
            Err(SearchError::NoIndexers) => {
                self.activity
                    .error(
                        Some(&book.id),
                        &format!("No indexers are configured; cannot search for '{}'", book.title),
                    )
                    .await;
                DispatchOutcome::Fatal("no indexers configured".to_string())
            }
            Err(SearchError::Database(e)) => {
                DispatchOutcome::Retry(format!("database error: {}", e))
            }
        }
    }

    async fn search_all_missing(&self) -> DispatchOutcome {
        let books = match self.database.get_missing_books().await {
            Ok(books) => books,
            Err(e) => return DispatchOutcome::Retry(format!("database error: {}", e)),
        };
        if books.is_empty() {
            return DispatchOutcome::Succeeded;
        }

        info!("Jobs: scheduling search for {} missing book(s)", books.len());
        for book in &books {
            let enqueue = self
                .queue
                .enqueue(&JobPayload::SearchBook {
                    book_id: book.id.clone(),
                })
                .await;
            if let Err(e) = enqueue {
                // Duplicate search jobs from a retry are harmless; each one
                // re-checks book state before doing anything.
                return DispatchOutcome::Retry(format!(
                    "failed to schedule search for {}: {}",
                    book.id, e
                ));
            }
        }
        DispatchOutcome::Succeeded
    }

    async fn grab_release(&self, release_id: &str) -> DispatchOutcome {
        let release = match self.database.get_release(release_id).await {
            Ok(Some(release)) => release,
            Ok(None) => {
                return DispatchOutcome::Fatal(format!("release {} not found", release_id))
            }
            Err(e) => return DispatchOutcome::Retry(format!("database error: {}", e)),
        };

        match self.orchestrator.grab_release(&release).await {
            Ok(GrabOutcome::Started { download_id }) => {
                info!("Jobs: grab of '{}' started download {}", release.title, download_id);
                DispatchOutcome::Succeeded
            }
            Ok(GrabOutcome::AlreadyDownloading) => DispatchOutcome::Succeeded,
            Ok(GrabOutcome::NoClientConfigured) => {
                DispatchOutcome::Fatal("no download client configured".to_string())
            }
            Err(e) => DispatchOutcome::Retry(e.to_string()),
        }
    }

    async fn poll_downloads(&self) -> DispatchOutcome {
        match self.orchestrator.poll_downloads().await {
            Ok(summary) => {
                if summary.updated > 0 {
                    info!(
                        "Jobs: poll updated {} of {} active download(s)",
                        summary.updated, summary.checked
                    );
                }
                DispatchOutcome::Succeeded
            }
            Err(e) => DispatchOutcome::Retry(format!("poll failed: {}", e)),
        }
    }

    async fn import_download(&self, download_id: &str) -> DispatchOutcome {
        match self.importer.import_with_merge(download_id).await {
            Ok(outcome) => {
                info!(
                    "Jobs: imported {} ({})",
                    outcome.imported_path.display(),
                    outcome.format_name
                );
                DispatchOutcome::Succeeded
            }
            Err(err) => {
                let terminal = matches!(
                    err,
                    ImportError::DownloadNotFound(_)
                        | ImportError::BookNotFound(_)
                        | ImportError::MissingOutputPath
                        | ImportError::MultiFile { .. }
                        | ImportError::NoMatchingFiles
                );
                if terminal {
                    let book_id = self
                        .database
                        .get_download(download_id)
                        .await
                        .ok()
                        .flatten()
                        .map(|d| d.book_id);
                    self.activity
                        .error(
                            book_id.as_deref(),
                            &format!("Import of download {} failed: {}", download_id, err),
                        )
                        .await;
                    DispatchOutcome::Fatal(err.to_string())
                } else {
                    DispatchOutcome::Retry(err.to_string())
                }
            }
        }
    }
}

#[async_trait]
impl Dispatch for JobDispatcher {
    async fn dispatch(&self, payload: &JobPayload) -> DispatchOutcome {
        match payload {
            JobPayload::SearchBook { book_id } => self.search_book(book_id).await,
            JobPayload::SearchAllMissing => self.search_all_missing().await,
            JobPayload::GrabRelease { release_id } => self.grab_release(release_id).await,
            JobPayload::PollDownloads => self.poll_downloads().await,
            JobPayload::ImportDownload { download_id } => self.import_download(download_id).await,
        }
    }
}
