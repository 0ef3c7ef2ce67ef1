use serde::{Deserialize, Serialize};

/// Closed set of work the runner knows how to execute.
///
/// Persisted as JSON in the jobs table; the serde tag doubles as the
/// `job_type` column so jobs can be filtered without parsing payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobPayload {
    SearchBook { book_id: String },
    SearchAllMissing,
    GrabRelease { release_id: String },
    PollDownloads,
    ImportDownload { download_id: String },
}

impl JobPayload {
    /// Stable tag matching the serialized `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::SearchBook { .. } => "search-book",
            JobPayload::SearchAllMissing => "search-all-missing",
            JobPayload::GrabRelease { .. } => "grab-release",
            JobPayload::PollDownloads => "poll-downloads",
            JobPayload::ImportDownload { .. } => "import-download",
        }
    }
}
