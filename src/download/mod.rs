// # Download Module
//
// Hands grabbed releases to a Usenet download backend and tracks them:
//
// - **DownloadClient**: Protocol-agnostic adapter capability (enqueue, status)
// - **SabnzbdClient**: SABnzbd's GET /api dialect
// - **NzbgetClient**: NZBGet's JSON-RPC dialect
// - **DownloadOrchestrator**: Grab and poll flows over Download rows

mod nzbget;
mod orchestrator;
mod sabnzbd;

// Public API exports
pub use nzbget::NzbgetClient;
pub use orchestrator::{
    apply_path_mappings, DownloadOrchestrator, GrabOutcome, OrchestratorError, PollSummary,
};
pub use sabnzbd::SabnzbdClient;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{DbDownloadClient, DownloadClientKind, DownloadStatus};

#[derive(Error, Debug)]
pub enum DownloadClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected backend response: {0}")]
    Protocol(String),
    #[error("item {0} not found on the backend")]
    NotFound(String),
}

/// Metadata passed to the backend alongside the NZB link
#[derive(Debug, Clone, Default)]
pub struct EnqueueMeta {
    pub title: String,
    pub category: Option<String>,
}

/// Backend-reported state of one queued item, normalized to our statuses
#[derive(Debug, Clone, PartialEq)]
pub struct BackendStatus {
    pub status: DownloadStatus,
    pub output_path: Option<String>,
    pub error: Option<String>,
}

/// Capability a download backend must provide. Both wire protocols reduce
/// to the same two calls; orchestration code never sees which is which.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Submit an NZB by URL; returns the backend's id for the new item
    async fn enqueue(
        &self,
        source_url: &str,
        meta: &EnqueueMeta,
    ) -> Result<String, DownloadClientError>;

    /// Current state of a previously enqueued item
    async fn status(&self, backend_item_id: &str) -> Result<BackendStatus, DownloadClientError>;
}

/// Build the adapter matching a configured download client row
pub fn client_for(config: &DbDownloadClient) -> Arc<dyn DownloadClient> {
    match config.kind {
        DownloadClientKind::Sabnzbd => Arc::new(SabnzbdClient::from_config(config)),
        DownloadClientKind::Nzbget => Arc::new(NzbgetClient::from_config(config)),
    }
}
