use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::CoreConfig;
use crate::db::DbJob;
use crate::jobs::payload::JobPayload;
use crate::jobs::queue::{JobQueue, JobQueueError};

/// What executing one job produced
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Succeeded,
    /// Transient failure; the queue's retry policy decides what happens next
    Retry(String),
    /// Permanent failure; retrying cannot help
    Fatal(String),
}

/// Executes one parsed payload.
///
/// The production implementation wires the search, download and import
/// services together; tests substitute a recording stub.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, payload: &JobPayload) -> DispatchOutcome;
}

/// Tick loop that drains the job queue.
///
/// Each tick claims up to `worker_concurrency` due jobs and runs them
/// concurrently; the next tick is not polled until the whole batch has
/// settled, so a slow backend never piles up unbounded work. The recurring
/// search and poll jobs are scheduled from their own timers, which fire
/// once immediately on startup.
pub struct JobRunner {
    queue: JobQueue,
    dispatcher: Arc<dyn Dispatch>,
    tick_interval: Duration,
    worker_concurrency: usize,
    search_interval: Duration,
    poll_interval: Duration,
}

/// Stops the runner when dropped or explicitly shut down
pub struct JobRunnerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl JobRunnerHandle {
    /// Signal the loop to stop and wait for the in-flight batch to settle
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

impl JobRunner {
    pub fn new(queue: JobQueue, dispatcher: Arc<dyn Dispatch>, config: &CoreConfig) -> Self {
        Self {
            queue,
            dispatcher,
            tick_interval: config.tick_interval,
            worker_concurrency: config.worker_concurrency,
            search_interval: config.search_interval,
            poll_interval: config.poll_interval,
        }
    }

    /// Recover jobs interrupted by the previous shutdown, then spawn the
    /// tick loop.
    pub async fn start(self) -> Result<JobRunnerHandle, JobQueueError> {
        self.queue.recover_interrupted().await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run_loop(shutdown_rx));
        info!("JobRunner: started");

        Ok(JobRunnerHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn run_loop(self, mut shutdown: oneshot::Receiver<()>) {
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Both recurring timers fire immediately, so the first search and
        // poll are queued as soon as the runner is up.
        let mut search_timer = tokio::time::interval(self.search_interval);
        search_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll_timer = tokio::time::interval(self.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    break;
                }
                _ = tick.tick() => {
                    self.run_batch().await;
                }
                _ = search_timer.tick() => {
                    self.schedule_recurring(&JobPayload::SearchAllMissing).await;
                }
                _ = poll_timer.tick() => {
                    self.schedule_recurring(&JobPayload::PollDownloads).await;
                }
            }
        }

        info!("JobRunner: stopped");
    }

    async fn schedule_recurring(&self, payload: &JobPayload) {
        debug!("JobRunner: scheduling recurring {} job", payload.kind());
        if let Err(e) = self.queue.enqueue(payload).await {
            error!("JobRunner: failed to schedule {} job: {}", payload.kind(), e);
        }
    }

    async fn run_batch(&self) {
        let claimed = match self.queue.claim_due(Utc::now(), self.worker_concurrency).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("JobRunner: failed to claim due jobs: {}", e);
                return;
            }
        };
        if claimed.is_empty() {
            return;
        }

        debug!("JobRunner: running batch of {} job(s)", claimed.len());
        join_all(claimed.iter().map(|job| self.run_job(job))).await;
    }

    async fn run_job(&self, job: &DbJob) {
        let payload: JobPayload = match serde_json::from_str(&job.payload) {
            Ok(payload) => payload,
            Err(e) => {
                // Unknown or malformed payloads never improve with retries
                let result = self
                    .queue
                    .mark_failed_terminal(job, &format!("unusable payload: {}", e))
                    .await;
                if let Err(e) = result {
                    error!("JobRunner: failed to record outcome for job {}: {}", job.id, e);
                }
                return;
            }
        };

        debug!("JobRunner: dispatching {} job {}", job.job_type, job.id);
        let result = match self.dispatcher.dispatch(&payload).await {
            DispatchOutcome::Succeeded => self.queue.mark_succeeded(job).await,
            DispatchOutcome::Retry(reason) => {
                warn!("JobRunner: {} job {} hit a transient failure: {}", job.job_type, job.id, reason);
                self.queue.mark_failed(job, &reason).await
            }
            DispatchOutcome::Fatal(reason) => {
                warn!("JobRunner: {} job {} failed for good: {}", job.job_type, job.id, reason);
                self.queue.mark_failed_terminal(job, &reason).await
            }
        };
        if let Err(e) = result {
            error!("JobRunner: failed to record outcome for job {}: {}", job.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::db::{Database, JobStatus};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Dispatch stub with per-kind scripted outcomes; unscripted payloads
    /// succeed.
    #[derive(Default)]
    struct RecordingDispatch {
        outcomes: Mutex<HashMap<&'static str, VecDeque<DispatchOutcome>>>,
        seen: Mutex<Vec<JobPayload>>,
    }

    impl RecordingDispatch {
        fn script(&self, kind: &'static str, outcomes: Vec<DispatchOutcome>) {
            self.outcomes
                .lock()
                .unwrap()
                .insert(kind, outcomes.into_iter().collect());
        }

        fn seen(&self) -> Vec<JobPayload> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatch for RecordingDispatch {
        async fn dispatch(&self, payload: &JobPayload) -> DispatchOutcome {
            self.seen.lock().unwrap().push(payload.clone());
            self.outcomes
                .lock()
                .unwrap()
                .get_mut(payload.kind())
                .and_then(|queue| queue.pop_front())
                .unwrap_or(DispatchOutcome::Succeeded)
        }
    }

    fn test_config(temp: &TempDir, retry: RetryPolicy) -> CoreConfig {
        CoreConfig {
            database_path: temp.path().join("bookhound.db"),
            library_root: temp.path().join("library"),
            tick_interval: Duration::from_millis(100),
            worker_concurrency: 4,
            indexer_timeout: Duration::from_secs(10),
            // Long enough that only the immediate startup fire happens
            search_interval: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(3600),
            retry,
        }
    }

    async fn setup(
        retry: RetryPolicy,
    ) -> (TempDir, Database, JobQueue, Arc<RecordingDispatch>, CoreConfig) {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp, retry);
        let database = Database::new(config.database_path.to_str().unwrap())
            .await
            .unwrap();
        let queue = JobQueue::new(database.clone(), config.retry);
        let dispatcher = Arc::new(RecordingDispatch::default());
        (temp, database, queue, dispatcher, config)
    }

    #[tokio::test]
    async fn test_runner_executes_queued_job() {
        let (_temp, database, queue, dispatcher, config) = setup(RetryPolicy::default()).await;

        let job = queue
            .enqueue(&JobPayload::ImportDownload {
                download_id: "d1".to_string(),
            })
            .await
            .unwrap();

        let runner = JobRunner::new(queue.clone(), dispatcher.clone(), &config);
        let handle = runner.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.shutdown().await;

        let row = database.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Succeeded);
        assert!(dispatcher.seen().contains(&JobPayload::ImportDownload {
            download_id: "d1".to_string()
        }));
    }

    #[tokio::test]
    async fn test_recurring_jobs_fire_on_startup() {
        let (_temp, _database, queue, dispatcher, config) = setup(RetryPolicy::default()).await;

        let runner = JobRunner::new(queue.clone(), dispatcher.clone(), &config);
        let handle = runner.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.shutdown().await;

        let seen = dispatcher.seen();
        assert!(seen.contains(&JobPayload::SearchAllMissing));
        assert!(seen.contains(&JobPayload::PollDownloads));
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_into_terminal() {
        let retry = RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_secs(0),
        };
        let (_temp, database, queue, dispatcher, config) = setup(retry).await;
        dispatcher.script(
            "grab-release",
            vec![
                DispatchOutcome::Retry("backend busy".to_string()),
                DispatchOutcome::Retry("backend still busy".to_string()),
            ],
        );

        let job = queue
            .enqueue(&JobPayload::GrabRelease {
                release_id: "r1".to_string(),
            })
            .await
            .unwrap();

        let runner = JobRunner::new(queue.clone(), dispatcher.clone(), &config);
        let handle = runner.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.shutdown().await;

        let row = database.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.attempts, 2);
        assert_eq!(row.last_error.as_deref(), Some("backend still busy"));
    }

    #[tokio::test]
    async fn test_fatal_outcome_skips_retries() {
        let (_temp, database, queue, dispatcher, config) = setup(RetryPolicy::default()).await;
        dispatcher.script(
            "import-download",
            vec![DispatchOutcome::Fatal("download row deleted".to_string())],
        );

        let job = queue
            .enqueue(&JobPayload::ImportDownload {
                download_id: "gone".to_string(),
            })
            .await
            .unwrap();

        let runner = JobRunner::new(queue.clone(), dispatcher.clone(), &config);
        let handle = runner.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.shutdown().await;

        let row = database.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.last_error.as_deref(), Some("download row deleted"));
    }

    #[tokio::test]
    async fn test_unparseable_payload_fails_without_dispatch() {
        let (_temp, database, queue, dispatcher, config) = setup(RetryPolicy::default()).await;

        let now = Utc::now();
        let job = DbJob {
            id: "broken-job".to_string(),
            job_type: "mystery".to_string(),
            payload: "definitely not json".to_string(),
            status: JobStatus::Queued,
            run_at: now,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        database.insert_job(&job).await.unwrap();

        let runner = JobRunner::new(queue.clone(), dispatcher.clone(), &config);
        let handle = runner.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.shutdown().await;

        let row = database.get_job("broken-job").await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert!(row.last_error.unwrap().contains("unusable payload"));
        // The dispatcher never saw it
        assert!(dispatcher
            .seen()
            .iter()
            .all(|p| matches!(p, JobPayload::SearchAllMissing | JobPayload::PollDownloads)));
    }

    #[tokio::test]
    async fn test_startup_recovers_interrupted_jobs() {
        let (_temp, database, queue, dispatcher, config) = setup(RetryPolicy::default()).await;

        let job = queue
            .enqueue(&JobPayload::SearchBook {
                book_id: "b1".to_string(),
            })
            .await
            .unwrap();
        // Claim without completing, as if the process died mid-job
        let claimed = queue.claim_due(Utc::now(), 5).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let runner = JobRunner::new(queue.clone(), dispatcher.clone(), &config);
        let handle = runner.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.shutdown().await;

        let row = database.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Succeeded);
        assert_eq!(row.attempts, 2);
    }
}
