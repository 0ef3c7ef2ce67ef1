use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

// String constants for SQL DEFAULT clauses (keep in sync with as_str())
const BOOK_STATE_MISSING: &str = "missing";
const BOOK_STATE_AVAILABLE: &str = "available";
const JOB_STATUS_QUEUED: &str = "queued";
const DOWNLOAD_STATUS_DOWNLOADING: &str = "downloading";

/// Database models for the bookhound acquisition pipeline
///
/// Storage strategy:
/// - Books are the tracked catalog items; everything else hangs off them
/// - Releases are scored search candidates, kept for later manual selection
/// - Downloads and jobs are the two mutable work tables driven by the engine
/// - Indexers, formats, download clients and path mappings are configuration,
///   read-only to the engine
///
/// Availability state of a catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookState {
    Missing,   // Tracked but not yet acquired
    Available, // Imported into the library tree
}

impl BookState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookState::Missing => BOOK_STATE_MISSING,
            BookState::Available => BOOK_STATE_AVAILABLE,
        }
    }
}

/// Status of one fetch handed to a download backend
///
/// Transitions only move forward: queued -> downloading -> completed, or
/// -> failed from any non-terminal state. A completed download is never
/// reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => DOWNLOAD_STATUS_DOWNLOADING,
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

/// Lifecycle of a queued unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,    // Waiting for its run_at to pass
    Running,   // Claimed by the runner for this attempt
    Succeeded, // Terminal success
    Failed,    // Terminal failure after exhausted attempts
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => JOB_STATUS_QUEUED,
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

/// Which wire protocol a configured download client speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DownloadClientKind {
    Sabnzbd,
    Nzbget,
}

/// Category of an append-only activity event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Grabbed,
    SearchFailed,
    DownloadFailed,
    ImportCompleted,
    BookAvailable,
    Error,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Grabbed => "grabbed",
            ActivityKind::SearchFailed => "search_failed",
            ActivityKind::DownloadFailed => "download_failed",
            ActivityKind::ImportCompleted => "import_completed",
            ActivityKind::BookAvailable => "book_available",
            ActivityKind::Error => "error",
        }
    }
}

/// Catalog item being tracked for acquisition
///
/// Created when the user adds a book; the engine only ever flips `state`
/// to Available after a successful import. Authors are an ordered list
/// (first entry is the primary author used for search queries and the
/// library path).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbBook {
    pub id: String,
    /// Identifier in the external catalog this record came from
    pub foreign_id: String,
    pub title: String,
    pub authors: String, // JSON array of author names, ordered
    pub isbns: String,   // JSON array of ISBN-10/13 strings
    pub state: BookState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbBook {
    pub fn new(
        foreign_id: &str,
        title: &str,
        authors: &[String],
        isbns: &[String],
    ) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(DbBook {
            id: Uuid::new_v4().to_string(),
            foreign_id: foreign_id.to_string(),
            title: title.to_string(),
            authors: serde_json::to_string(authors)?,
            isbns: serde_json::to_string(isbns)?,
            state: BookState::Missing,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn authors(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.authors)
    }

    pub fn isbns(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.isbns)
    }
}

/// Candidate found on an indexer for a specific book
///
/// `(book_id, guid)` is unique; re-discovering the same guid on a later
/// search must not create a duplicate row. Immutable once created except
/// for the score, which automatic search refreshes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbRelease {
    pub id: String,
    pub book_id: String,
    pub indexer_id: String,
    /// Indexer-assigned unique id for this offering
    pub guid: String,
    pub title: String,
    /// Direct fetch URL handed to the download client
    pub link: String,
    pub size: Option<i64>,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

impl DbRelease {
    pub fn new(
        book_id: &str,
        indexer_id: &str,
        guid: &str,
        title: &str,
        link: &str,
        size: Option<i64>,
        score: f64,
    ) -> Self {
        DbRelease {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            indexer_id: indexer_id.to_string(),
            guid: guid.to_string(),
            title: title.to_string(),
            link: link.to_string(),
            size,
            score,
            created_at: Utc::now(),
        }
    }
}

/// One in-flight or settled fetch at a download backend
///
/// Owned exclusively by the download orchestrator. `backend_item_id` is the
/// backend's own identifier for the queue entry; status updates target rows
/// by it when known so a duplicate row created by a race still converges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbDownload {
    pub id: String,
    pub book_id: String,
    pub download_client_id: String,
    pub backend_item_id: Option<String>,
    pub status: DownloadStatus,
    /// Backend-reported completion path, after path-mapping translation
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbDownload {
    pub fn new(book_id: &str, download_client_id: &str, backend_item_id: &str) -> Self {
        let now = Utc::now();
        DbDownload {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            download_client_id: download_client_id.to_string(),
            backend_item_id: Some(backend_item_id.to_string()),
            status: DownloadStatus::Downloading,
            output_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable unit of deferred work
///
/// `payload` is the JSON form of `crate::jobs::JobPayload`, serialized only
/// at this persistence boundary. `job_type` duplicates the payload tag for
/// cheap querying. Claimed exactly once per attempt via compare-and-swap on
/// status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbJob {
    pub id: String,
    pub job_type: String,
    pub payload: String, // JSON, tagged by job_type
    pub status: JobStatus,
    /// Earliest time the job may be claimed
    pub run_at: DateTime<Utc>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Configured search indexer (Newznab-style)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbIndexer {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// JSON array of numeric category ids; None means the built-in ebook set
    pub categories: Option<String>,
    /// Lower number = queried first and wins score ties
    pub priority: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl DbIndexer {
    pub fn new(name: &str, base_url: &str, api_key: Option<&str>, priority: i64) -> Self {
        DbIndexer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            base_url: base_url.to_string(),
            api_key: api_key.map(|k| k.to_string()),
            categories: None,
            priority,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn category_ids(&self) -> Result<Vec<u32>, serde_json::Error> {
        match &self.categories {
            Some(json) => serde_json::from_str(json),
            None => Ok(Vec::new()),
        }
    }
}

/// Configured acquirable file format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbFormat {
    pub id: String,
    pub name: String,
    /// Lowercase extension without the leading dot, e.g. "epub"
    pub extension: String,
    /// Library subtree this format files under, e.g. "ebooks", "audiobooks"
    pub media_kind: String,
    /// Lower number = preferred; scales the matcher's format bonus
    pub priority: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl DbFormat {
    pub fn new(name: &str, extension: &str, media_kind: &str, priority: i64) -> Self {
        DbFormat {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            extension: extension.trim_start_matches('.').to_lowercase(),
            media_kind: media_kind.to_string(),
            priority,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Configured download backend connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbDownloadClient {
    pub id: String,
    pub name: String,
    pub kind: DownloadClientKind,
    pub base_url: String,
    /// API key (SABnzbd-style backends)
    pub api_key: Option<String>,
    /// Basic auth credentials (NZBGet-style backends)
    pub username: Option<String>,
    pub password: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl DbDownloadClient {
    pub fn new(name: &str, kind: DownloadClientKind, base_url: &str) -> Self {
        DbDownloadClient {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind,
            base_url: base_url.to_string(),
            api_key: None,
            username: None,
            password: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Prefix-substitution rule translating backend paths to local paths
///
/// A download backend reports completion paths in its own filesystem view;
/// the importer needs them in this process's view. The longest matching
/// remote prefix wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbPathMapping {
    pub id: String,
    pub remote_prefix: String,
    pub local_prefix: String,
    pub created_at: DateTime<Utc>,
}

impl DbPathMapping {
    pub fn new(remote_prefix: &str, local_prefix: &str) -> Self {
        DbPathMapping {
            id: Uuid::new_v4().to_string(),
            remote_prefix: remote_prefix.to_string(),
            local_prefix: local_prefix.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only audit record; never read back by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbActivityEvent {
    pub id: String,
    pub kind: ActivityKind,
    pub book_id: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// File committed to the library tree by the importer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbBookFile {
    pub id: String,
    pub book_id: String,
    pub path: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

impl DbBookFile {
    pub fn new(book_id: &str, path: &str, size: i64) -> Self {
        DbBookFile {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            path: path.to_string(),
            size,
            created_at: Utc::now(),
        }
    }
}
