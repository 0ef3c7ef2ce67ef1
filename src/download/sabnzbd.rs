//! SABnzbd adapter.
//!
//! SABnzbd exposes a single `GET /api` endpoint switched by `mode`:
//! `addurl` submits an NZB link, `queue` lists in-flight items and
//! `history` lists finished ones. A polled item is looked up in the queue
//! first and the history second.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::db::{DbDownloadClient, DownloadStatus};
use crate::download::{BackendStatus, DownloadClient, DownloadClientError, EnqueueMeta};

#[derive(Clone)]
pub struct SabnzbdClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddUrlResponse {
    status: bool,
    #[serde(default)]
    nzo_ids: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    queue: QueueBody,
}

#[derive(Debug, Deserialize)]
struct QueueBody {
    #[serde(default)]
    slots: Vec<QueueSlot>,
}

#[derive(Debug, Deserialize)]
struct QueueSlot {
    nzo_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: HistoryBody,
}

#[derive(Debug, Deserialize)]
struct HistoryBody {
    #[serde(default)]
    slots: Vec<HistorySlot>,
}

#[derive(Debug, Deserialize)]
struct HistorySlot {
    nzo_id: String,
    status: String,
    #[serde(default)]
    storage: Option<String>,
    #[serde(default)]
    fail_message: Option<String>,
}

impl SabnzbdClient {
    pub fn from_config(config: &DbDownloadClient) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    async fn api_get(
        &self,
        params: &[(&str, &str)],
    ) -> Result<reqwest::Response, DownloadClientError> {
        let url = format!("{}/api", self.base_url);

        let mut query: Vec<(&str, &str)> = vec![("output", "json")];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key));
        }
        query.extend_from_slice(params);

        let response = self.client.get(&url).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(DownloadClientError::Request(
                response.error_for_status().unwrap_err(),
            ));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl DownloadClient for SabnzbdClient {
    async fn enqueue(
        &self,
        source_url: &str,
        meta: &EnqueueMeta,
    ) -> Result<String, DownloadClientError> {
        let mut params = vec![("mode", "addurl"), ("name", source_url)];
        if !meta.title.is_empty() {
            params.push(("nzbname", meta.title.as_str()));
        }
        if let Some(category) = &meta.category {
            params.push(("cat", category.as_str()));
        }

        debug!("SABnzbd: addurl {}", source_url);
        let body: AddUrlResponse = self.api_get(&params).await?.json().await?;

        if !body.status {
            return Err(DownloadClientError::Rejected(
                body.error.unwrap_or_else(|| "addurl returned status=false".to_string()),
            ));
        }
        body.nzo_ids
            .into_iter()
            .next()
            .ok_or_else(|| DownloadClientError::Protocol("addurl returned no nzo_ids".to_string()))
    }

    async fn status(&self, backend_item_id: &str) -> Result<BackendStatus, DownloadClientError> {
        let queue: QueueResponse = self
            .api_get(&[("mode", "queue")])
            .await?
            .json()
            .await?;
        if let Some(slot) = queue
            .queue
            .slots
            .iter()
            .find(|s| s.nzo_id == backend_item_id)
        {
            return Ok(BackendStatus {
                status: map_queue_status(&slot.status),
                output_path: None,
                error: None,
            });
        }

        let history: HistoryResponse = self
            .api_get(&[("mode", "history")])
            .await?
            .json()
            .await?;
        if let Some(slot) = history
            .history
            .slots
            .iter()
            .find(|s| s.nzo_id == backend_item_id)
        {
            return Ok(map_history_slot(slot));
        }

        Err(DownloadClientError::NotFound(backend_item_id.to_string()))
    }
}

fn map_queue_status(status: &str) -> DownloadStatus {
    match status {
        "Downloading" | "Fetching" => DownloadStatus::Downloading,
        // Queued, Paused, Propagating, Grabbing, ...
        _ => DownloadStatus::Queued,
    }
}

fn map_history_slot(slot: &HistorySlot) -> BackendStatus {
    match slot.status.as_str() {
        "Completed" => BackendStatus {
            status: DownloadStatus::Completed,
            output_path: slot.storage.clone().filter(|s| !s.is_empty()),
            error: None,
        },
        "Failed" => BackendStatus {
            status: DownloadStatus::Failed,
            output_path: None,
            error: slot
                .fail_message
                .clone()
                .filter(|m| !m.is_empty())
                .or_else(|| Some("download failed".to_string())),
        },
        // Verifying, Repairing, Extracting, Running: post-processing in flight
        _ => BackendStatus {
            status: DownloadStatus::Downloading,
            output_path: None,
            error: None,
        },
    }
}
