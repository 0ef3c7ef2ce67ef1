use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::db::models::*;

// String constants for SQL DEFAULT clauses (keep in sync with as_str())
const BOOK_STATE_MISSING: &str = "missing";
const JOB_STATUS_QUEUED: &str = "queued";
const DOWNLOAD_STATUS_DOWNLOADING: &str = "downloading";

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Books table (tracked catalog items)
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                foreign_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                authors TEXT NOT NULL,
                isbns TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            BOOK_STATE_MISSING
        ))
        .execute(&self.pool)
        .await?;

        // Releases table (scored search candidates)
        // (book_id, guid) is unique so re-discovering a release is a no-op
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS releases (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                indexer_id TEXT NOT NULL,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                size INTEGER,
                score REAL NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books (id) ON DELETE CASCADE,
                UNIQUE(book_id, guid)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Downloads table (fetches handed to a backend)
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                download_client_id TEXT NOT NULL,
                backend_item_id TEXT,
                status TEXT NOT NULL DEFAULT '{}',
                output_path TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books (id) ON DELETE CASCADE
            )
            "#,
            DOWNLOAD_STATUS_DOWNLOADING
        ))
        .execute(&self.pool)
        .await?;

        // Jobs table (durable work queue)
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT '{}',
                run_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            JOB_STATUS_QUEUED
        ))
        .execute(&self.pool)
        .await?;

        // Indexers table (configured Newznab endpoints)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS indexers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_url TEXT NOT NULL,
                api_key TEXT,
                categories TEXT,
                priority INTEGER NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Formats table (acquirable file formats, by priority)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS formats (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                extension TEXT NOT NULL,
                media_kind TEXT NOT NULL,
                priority INTEGER NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Download clients table (configured backends)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS download_clients (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                base_url TEXT NOT NULL,
                api_key TEXT,
                username TEXT,
                password TEXT,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Path mappings table (remote prefix -> local prefix)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS path_mappings (
                id TEXT PRIMARY KEY,
                remote_prefix TEXT NOT NULL,
                local_prefix TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Activity events table (append-only audit log)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activity_events (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                book_id TEXT,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Book files table (files committed to the library tree)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS book_files (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes for performance
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_state ON books (state)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_releases_book_id ON releases (book_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads (status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_downloads_backend_item ON downloads (backend_item_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status_run_at ON jobs (status, run_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_activity_created_at ON activity_events (created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_book_files_book_id ON book_files (book_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a new book
    pub async fn add_book(&self, book: &DbBook) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO books (
                id, foreign_id, title, authors, isbns, state, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&book.id)
        .bind(&book.foreign_id)
        .bind(&book.title)
        .bind(&book.authors)
        .bind(&book.isbns)
        .bind(book.state)
        .bind(book.created_at.to_rfc3339())
        .bind(book.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_book(&self, book_id: &str) -> Result<Option<DbBook>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM books WHERE id = ?")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            Ok(Some(DbBook {
                id: row.get("id"),
                foreign_id: row.get("foreign_id"),
                title: row.get("title"),
                authors: row.get("authors"),
                isbns: row.get("isbns"),
                state: row.get("state"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
                updated_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            }))
        } else {
            Ok(None)
        }
    }

    /// Get all books still waiting to be acquired
    pub async fn get_missing_books(&self) -> Result<Vec<DbBook>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM books WHERE state = ? ORDER BY created_at")
            .bind(BookState::Missing)
            .fetch_all(&self.pool)
            .await?;

        let mut books = Vec::new();
        for row in rows {
            books.push(DbBook {
                id: row.get("id"),
                foreign_id: row.get("foreign_id"),
                title: row.get("title"),
                authors: row.get("authors"),
                isbns: row.get("isbns"),
                state: row.get("state"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
                updated_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(books)
    }

    pub async fn set_book_state(&self, book_id: &str, state: BookState) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE books SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state)
            .bind(Utc::now().to_rfc3339())
            .bind(book_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a release candidate, or refresh its score if the same
    /// (book_id, guid) pair was already discovered earlier
    pub async fn upsert_release(&self, release: &DbRelease) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO releases (
                id, book_id, indexer_id, guid, title, link, size, score, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(book_id, guid) DO UPDATE SET score = excluded.score
            "#,
        )
        .bind(&release.id)
        .bind(&release.book_id)
        .bind(&release.indexer_id)
        .bind(&release.guid)
        .bind(&release.title)
        .bind(&release.link)
        .bind(release.size)
        .bind(release.score)
        .bind(release.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_release(&self, release_id: &str) -> Result<Option<DbRelease>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM releases WHERE id = ?")
            .bind(release_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            Ok(Some(DbRelease {
                id: row.get("id"),
                book_id: row.get("book_id"),
                indexer_id: row.get("indexer_id"),
                guid: row.get("guid"),
                title: row.get("title"),
                link: row.get("link"),
                size: row.get("size"),
                score: row.get("score"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            }))
        } else {
            Ok(None)
        }
    }

    /// Release lookup by its natural key. Needed after an upsert, which
    /// keeps the original row id when the guid was already known.
    pub async fn get_release_by_guid(
        &self,
        book_id: &str,
        guid: &str,
    ) -> Result<Option<DbRelease>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM releases WHERE book_id = ? AND guid = ?")
            .bind(book_id)
            .bind(guid)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            Ok(Some(DbRelease {
                id: row.get("id"),
                book_id: row.get("book_id"),
                indexer_id: row.get("indexer_id"),
                guid: row.get("guid"),
                title: row.get("title"),
                link: row.get("link"),
                size: row.get("size"),
                score: row.get("score"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            }))
        } else {
            Ok(None)
        }
    }

    /// Get stored candidates for a book, best score first
    pub async fn get_releases_for_book(
        &self,
        book_id: &str,
    ) -> Result<Vec<DbRelease>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM releases WHERE book_id = ? ORDER BY score DESC")
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?;

        let mut releases = Vec::new();
        for row in rows {
            releases.push(DbRelease {
                id: row.get("id"),
                book_id: row.get("book_id"),
                indexer_id: row.get("indexer_id"),
                guid: row.get("guid"),
                title: row.get("title"),
                link: row.get("link"),
                size: row.get("size"),
                score: row.get("score"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(releases)
    }

    /// Insert a new download row
    pub async fn add_download(&self, download: &DbDownload) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO downloads (
                id, book_id, download_client_id, backend_item_id,
                status, output_path, error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&download.id)
        .bind(&download.book_id)
        .bind(&download.download_client_id)
        .bind(&download.backend_item_id)
        .bind(download.status)
        .bind(&download.output_path)
        .bind(&download.error)
        .bind(download.created_at.to_rfc3339())
        .bind(download.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_download(&self, download_id: &str) -> Result<Option<DbDownload>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?")
            .bind(download_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            Ok(Some(DbDownload {
                id: row.get("id"),
                book_id: row.get("book_id"),
                download_client_id: row.get("download_client_id"),
                backend_item_id: row.get("backend_item_id"),
                status: row.get("status"),
                output_path: row.get("output_path"),
                error: row.get("error"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
                updated_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            }))
        } else {
            Ok(None)
        }
    }

    /// Get downloads the orchestrator still needs to poll, oldest first.
    /// The rowid tie-break keeps insertion order stable for rows created
    /// within the same timestamp.
    pub async fn get_active_downloads(&self) -> Result<Vec<DbDownload>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM downloads
            WHERE status IN (?, ?)
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(DownloadStatus::Queued)
        .bind(DownloadStatus::Downloading)
        .fetch_all(&self.pool)
        .await?;

        let mut downloads = Vec::new();
        for row in rows {
            downloads.push(DbDownload {
                id: row.get("id"),
                book_id: row.get("book_id"),
                download_client_id: row.get("download_client_id"),
                backend_item_id: row.get("backend_item_id"),
                status: row.get("status"),
                output_path: row.get("output_path"),
                error: row.get("error"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
                updated_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(downloads)
    }

    /// Whether the book already has a fetch in flight
    pub async fn has_active_download(&self, book_id: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM downloads WHERE book_id = ? AND status IN (?, ?)",
        )
        .bind(book_id)
        .bind(DownloadStatus::Queued)
        .bind(DownloadStatus::Downloading)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    /// Update a download addressed by its backend item id. Returns the number
    /// of rows touched so the caller can fall back to updating by row id.
    pub async fn update_download_by_backend_item(
        &self,
        backend_item_id: &str,
        status: DownloadStatus,
        output_path: Option<&str>,
        error: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, output_path = ?, error = ?, updated_at = ?
            WHERE backend_item_id = ?
            "#,
        )
        .bind(status)
        .bind(output_path)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(backend_item_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn update_download(
        &self,
        download_id: &str,
        status: DownloadStatus,
        output_path: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, output_path = ?, error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(output_path)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(download_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new job
    pub async fn insert_job(&self, job: &DbJob) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, status, run_at,
                attempts, last_error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status)
        .bind(job.run_at.to_rfc3339())
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<DbJob>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            Ok(Some(DbJob {
                id: row.get("id"),
                job_type: row.get("job_type"),
                payload: row.get("payload"),
                status: row.get("status"),
                run_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("run_at"))
                    .unwrap()
                    .with_timezone(&Utc),
                attempts: row.get("attempts"),
                last_error: row.get("last_error"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
                updated_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            }))
        } else {
            Ok(None)
        }
    }

    /// Get queued jobs whose run_at has passed, oldest work first
    pub async fn get_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DbJob>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = ? AND run_at <= ?
            ORDER BY run_at ASC
            LIMIT ?
            "#,
        )
        .bind(JobStatus::Queued)
        .bind(now.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(DbJob {
                id: row.get("id"),
                job_type: row.get("job_type"),
                payload: row.get("payload"),
                status: row.get("status"),
                run_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("run_at"))
                    .unwrap()
                    .with_timezone(&Utc),
                attempts: row.get("attempts"),
                last_error: row.get("last_error"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
                updated_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(jobs)
    }

    /// Compare-and-swap claim of one job. The WHERE clause only matches a
    /// still-queued row, so of two racing claimants exactly one sees
    /// rows_affected == 1.
    pub async fn try_claim_job(&self, job_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, attempts = attempts + 1, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Running)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .bind(JobStatus::Queued)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_job_succeeded(&self, job_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(JobStatus::Succeeded)
            .bind(Utc::now().to_rfc3339())
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Put a failed job back in the queue for a later attempt
    pub async fn requeue_job(
        &self,
        job_id: &str,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, run_at = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(JobStatus::Queued)
        .bind(run_at.to_rfc3339())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move a job to terminal failed; run_at is left untouched
    pub async fn mark_job_failed(&self, job_id: &str, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(JobStatus::Failed)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Demote every running job back to queued. Run once at startup before
    /// the first tick; a previous process may have died mid-lease.
    pub async fn requeue_running_jobs(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE status = ?")
            .bind(JobStatus::Queued)
            .bind(Utc::now().to_rfc3339())
            .bind(JobStatus::Running)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Insert a configured indexer
    pub async fn add_indexer(&self, indexer: &DbIndexer) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO indexers (
                id, name, base_url, api_key, categories, priority, enabled, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&indexer.id)
        .bind(&indexer.name)
        .bind(&indexer.base_url)
        .bind(&indexer.api_key)
        .bind(&indexer.categories)
        .bind(indexer.priority)
        .bind(indexer.enabled)
        .bind(indexer.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get enabled indexers in query order (ascending priority)
    pub async fn get_enabled_indexers(&self) -> Result<Vec<DbIndexer>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM indexers WHERE enabled = TRUE ORDER BY priority ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut indexers = Vec::new();
        for row in rows {
            indexers.push(DbIndexer {
                id: row.get("id"),
                name: row.get("name"),
                base_url: row.get("base_url"),
                api_key: row.get("api_key"),
                categories: row.get("categories"),
                priority: row.get("priority"),
                enabled: row.get("enabled"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(indexers)
    }

    /// Insert a configured format
    pub async fn add_format(&self, format: &DbFormat) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO formats (
                id, name, extension, media_kind, priority, enabled, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&format.id)
        .bind(&format.name)
        .bind(&format.extension)
        .bind(&format.media_kind)
        .bind(format.priority)
        .bind(format.enabled)
        .bind(format.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get enabled formats, most preferred first (ascending priority)
    pub async fn get_enabled_formats(&self) -> Result<Vec<DbFormat>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM formats WHERE enabled = TRUE ORDER BY priority ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut formats = Vec::new();
        for row in rows {
            formats.push(DbFormat {
                id: row.get("id"),
                name: row.get("name"),
                extension: row.get("extension"),
                media_kind: row.get("media_kind"),
                priority: row.get("priority"),
                enabled: row.get("enabled"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(formats)
    }

    /// Insert a configured download client
    pub async fn add_download_client(&self, client: &DbDownloadClient) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO download_clients (
                id, name, kind, base_url, api_key, username, password, enabled, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(client.kind)
        .bind(&client.base_url)
        .bind(&client.api_key)
        .bind(&client.username)
        .bind(&client.password)
        .bind(client.enabled)
        .bind(client.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the single active download client, if one is configured.
    /// With several enabled the oldest entry wins.
    pub async fn get_active_download_client(
        &self,
    ) -> Result<Option<DbDownloadClient>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT * FROM download_clients WHERE enabled = TRUE ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            Ok(Some(DbDownloadClient {
                id: row.get("id"),
                name: row.get("name"),
                kind: row.get("kind"),
                base_url: row.get("base_url"),
                api_key: row.get("api_key"),
                username: row.get("username"),
                password: row.get("password"),
                enabled: row.get("enabled"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            }))
        } else {
            Ok(None)
        }
    }

    /// Insert a path mapping rule
    pub async fn add_path_mapping(&self, mapping: &DbPathMapping) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO path_mappings (id, remote_prefix, local_prefix, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&mapping.id)
        .bind(&mapping.remote_prefix)
        .bind(&mapping.local_prefix)
        .bind(mapping.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_path_mappings(&self) -> Result<Vec<DbPathMapping>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM path_mappings ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut mappings = Vec::new();
        for row in rows {
            mappings.push(DbPathMapping {
                id: row.get("id"),
                remote_prefix: row.get("remote_prefix"),
                local_prefix: row.get("local_prefix"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(mappings)
    }

    /// Append an activity event
    pub async fn insert_activity(&self, event: &DbActivityEvent) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO activity_events (id, kind, book_id, message, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(event.kind)
        .bind(&event.book_id)
        .bind(&event.message)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Recent activity, newest first
    pub async fn recent_activity(&self, limit: i64) -> Result<Vec<DbActivityEvent>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM activity_events ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::new();
        for row in rows {
            events.push(DbActivityEvent {
                id: row.get("id"),
                kind: row.get("kind"),
                book_id: row.get("book_id"),
                message: row.get("message"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(events)
    }

    /// Record a file committed to the library tree
    pub async fn add_book_file(&self, file: &DbBookFile) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO book_files (id, book_id, path, size, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.book_id)
        .bind(&file.path)
        .bind(file.size)
        .bind(file.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_book_files(&self, book_id: &str) -> Result<Vec<DbBookFile>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM book_files WHERE book_id = ? ORDER BY created_at")
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?;

        let mut files = Vec::new();
        for row in rows {
            files.push(DbBookFile {
                id: row.get("id"),
                book_id: row.get("book_id"),
                path: row.get("path"),
                size: row.get("size"),
                created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .unwrap()
                    .with_timezone(&Utc),
            });
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_db() -> (Database, TempDir) {
        let temp = TempDir::new().expect("create temp dir");
        let path = temp.path().join("test.db");
        let db = Database::new(path.to_str().unwrap())
            .await
            .expect("create database");
        (db, temp)
    }

    #[tokio::test]
    async fn test_book_roundtrip() {
        let (db, _temp) = test_db().await;

        let book = DbBook::new("ol-1", "Dune", &["Frank Herbert".to_string()], &[]).unwrap();
        db.add_book(&book).await.unwrap();

        let loaded = db.get_book(&book.id).await.unwrap().expect("book exists");
        assert_eq!(loaded.title, "Dune");
        assert_eq!(loaded.state, BookState::Missing);

        db.set_book_state(&book.id, BookState::Available)
            .await
            .unwrap();
        let loaded = db.get_book(&book.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, BookState::Available);

        let missing = db.get_missing_books().await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_release_upsert_same_guid() {
        let (db, _temp) = test_db().await;

        let book = DbBook::new("ol-2", "Hyperion", &[], &[]).unwrap();
        db.add_book(&book).await.unwrap();

        let first = DbRelease::new(
            &book.id,
            "idx-1",
            "guid-abc",
            "Hyperion EPUB",
            "http://example/nzb/1",
            Some(1024),
            0.82,
        );
        db.upsert_release(&first).await.unwrap();

        // Re-discovering the same guid must not create a second row
        let again = DbRelease::new(
            &book.id,
            "idx-1",
            "guid-abc",
            "Hyperion EPUB",
            "http://example/nzb/1",
            Some(1024),
            0.91,
        );
        db.upsert_release(&again).await.unwrap();

        let releases = db.get_releases_for_book(&book.id).await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].id, first.id);
        assert!((releases[0].score - 0.91).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_active_download_lookup() {
        let (db, _temp) = test_db().await;

        let book = DbBook::new("ol-3", "Solaris", &[], &[]).unwrap();
        db.add_book(&book).await.unwrap();
        assert!(!db.has_active_download(&book.id).await.unwrap());

        let download = DbDownload::new(&book.id, "client-1", "nzo_1");
        db.add_download(&download).await.unwrap();
        assert!(db.has_active_download(&book.id).await.unwrap());

        db.update_download_by_backend_item("nzo_1", DownloadStatus::Completed, Some("/done"), None)
            .await
            .unwrap();
        assert!(!db.has_active_download(&book.id).await.unwrap());

        let loaded = db.get_download(&download.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DownloadStatus::Completed);
        assert_eq!(loaded.output_path.as_deref(), Some("/done"));
    }

    #[tokio::test]
    async fn test_config_entity_ordering() {
        let (db, _temp) = test_db().await;

        let mut second = DbIndexer::new("b", "http://b", None, 2);
        second.enabled = true;
        db.add_indexer(&second).await.unwrap();
        db.add_indexer(&DbIndexer::new("a", "http://a", None, 1))
            .await
            .unwrap();
        let mut disabled = DbIndexer::new("c", "http://c", None, 0);
        disabled.enabled = false;
        db.add_indexer(&disabled).await.unwrap();

        let indexers = db.get_enabled_indexers().await.unwrap();
        assert_eq!(indexers.len(), 2);
        assert_eq!(indexers[0].name, "a");
        assert_eq!(indexers[1].name, "b");

        db.add_format(&DbFormat::new("MOBI", "mobi", "ebooks", 2))
            .await
            .unwrap();
        db.add_format(&DbFormat::new("EPUB", "epub", "ebooks", 1))
            .await
            .unwrap();
        let formats = db.get_enabled_formats().await.unwrap();
        assert_eq!(formats[0].extension, "epub");
    }
}
