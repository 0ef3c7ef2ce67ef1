use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::db::{Database, DbJob, JobStatus};
use crate::jobs::payload::JobPayload;

#[derive(Error, Debug)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Durable queue over the jobs table.
///
/// Every mutation goes through SQLite, so queued work survives restarts and
/// a claim is a compare-and-swap on status rather than an in-memory lock.
#[derive(Clone)]
pub struct JobQueue {
    database: Database,
    retry: RetryPolicy,
}

impl JobQueue {
    pub fn new(database: Database, retry: RetryPolicy) -> Self {
        Self { database, retry }
    }

    /// Enqueue work to run as soon as a worker picks it up
    pub async fn enqueue(&self, payload: &JobPayload) -> Result<DbJob, JobQueueError> {
        self.enqueue_at(payload, Utc::now()).await
    }

    /// Enqueue work to run no earlier than `run_at`
    pub async fn enqueue_at(
        &self,
        payload: &JobPayload,
        run_at: DateTime<Utc>,
    ) -> Result<DbJob, JobQueueError> {
        let now = Utc::now();
        let job = DbJob {
            id: Uuid::new_v4().to_string(),
            job_type: payload.kind().to_string(),
            payload: serde_json::to_string(payload)?,
            status: JobStatus::Queued,
            run_at,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.database.insert_job(&job).await?;
        debug!("JobQueue: enqueued {} job {}", job.job_type, job.id);
        Ok(job)
    }

    /// Claim up to `limit` due jobs.
    ///
    /// Each claim flips `queued -> running` atomically, so two workers
    /// scanning the same due set never end up running the same job; the
    /// loser of the race just skips that row.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DbJob>, JobQueueError> {
        let due = self.database.get_due_jobs(now, limit as i64).await?;
        let mut claimed = Vec::new();
        for mut job in due {
            if self.database.try_claim_job(&job.id).await? {
                // Mirror what the claim did to the row
                job.status = JobStatus::Running;
                job.attempts += 1;
                claimed.push(job);
            }
        }
        Ok(claimed)
    }

    pub async fn mark_succeeded(&self, job: &DbJob) -> Result<(), JobQueueError> {
        self.database.mark_job_succeeded(&job.id).await?;
        debug!("JobQueue: {} job {} succeeded", job.job_type, job.id);
        Ok(())
    }

    /// Record a failure. With retry budget left the job is requeued after
    /// the backoff; an exhausted budget is terminal.
    pub async fn mark_failed(&self, job: &DbJob, error: &str) -> Result<(), JobQueueError> {
        if job.attempts < self.retry.max_attempts {
            let backoff = ChronoDuration::from_std(self.retry.backoff)
                .unwrap_or_else(|_| ChronoDuration::seconds(60));
            let run_at = Utc::now() + backoff;
            warn!(
                "JobQueue: {} job {} failed (attempt {}/{}), retrying at {}: {}",
                job.job_type, job.id, job.attempts, self.retry.max_attempts, run_at, error
            );
            self.database.requeue_job(&job.id, run_at, error).await?;
        } else {
            warn!(
                "JobQueue: {} job {} failed permanently after {} attempt(s): {}",
                job.job_type, job.id, job.attempts, error
            );
            self.database.mark_job_failed(&job.id, error).await?;
        }
        Ok(())
    }

    /// Terminal failure regardless of remaining attempts, for conditions a
    /// retry cannot fix (unparseable payload, deleted referent).
    pub async fn mark_failed_terminal(&self, job: &DbJob, error: &str) -> Result<(), JobQueueError> {
        warn!(
            "JobQueue: {} job {} failed terminally: {}",
            job.job_type, job.id, error
        );
        self.database.mark_job_failed(&job.id, error).await?;
        Ok(())
    }

    /// Requeue jobs a previous process left in `running`. Called once on
    /// startup, before the first claim.
    pub async fn recover_interrupted(&self) -> Result<u64, JobQueueError> {
        let requeued = self.database.requeue_running_jobs().await?;
        if requeued > 0 {
            warn!(
                "JobQueue: requeued {} job(s) interrupted by an earlier shutdown",
                requeued
            );
        }
        Ok(requeued)
    }
}
