//! NZBGet adapter.
//!
//! NZBGet speaks JSON-RPC over `POST /jsonrpc`, optionally behind HTTP
//! Basic auth. `append` submits an NZB by URL and returns a numeric id;
//! `listgroups` covers active items and `history` finished ones.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::db::{DbDownloadClient, DownloadStatus};
use crate::download::{BackendStatus, DownloadClient, DownloadClientError, EnqueueMeta};

#[derive(Clone)]
pub struct NzbgetClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: serde_json::Value,
    id: u32,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct GroupItem {
    #[serde(rename = "NZBID")]
    nzb_id: i64,
    #[serde(rename = "Status")]
    status: String,
}

#[derive(Debug, Deserialize)]
struct HistoryItem {
    #[serde(rename = "NZBID")]
    nzb_id: i64,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "FinalDir", default)]
    final_dir: String,
    #[serde(rename = "DestDir", default)]
    dest_dir: String,
}

impl NzbgetClient {
    pub fn from_config(config: &DbDownloadClient) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, DownloadClientError> {
        let url = format!("{}/jsonrpc", self.base_url);

        let mut request = self.client.post(&url).json(&RpcRequest {
            method,
            params,
            id: 1,
        });
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DownloadClientError::Request(
                response.error_for_status().unwrap_err(),
            ));
        }

        let body: RpcResponse<T> = response.json().await?;
        if let Some(error) = body.error {
            return Err(DownloadClientError::Rejected(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        body.result
            .ok_or_else(|| DownloadClientError::Protocol(format!("{} returned no result", method)))
    }
}

#[async_trait::async_trait]
impl DownloadClient for NzbgetClient {
    async fn enqueue(
        &self,
        source_url: &str,
        meta: &EnqueueMeta,
    ) -> Result<String, DownloadClientError> {
        let nzb_filename = if meta.title.is_empty() {
            String::new()
        } else {
            format!("{}.nzb", meta.title)
        };
        let category = meta.category.clone().unwrap_or_default();

        debug!("NZBGet: append {}", source_url);
        let nzb_id: i64 = self
            .rpc(
                "append",
                json!([
                    nzb_filename,
                    source_url,
                    category,
                    0,       // priority
                    false,   // add to top
                    false,   // add paused
                    "",      // dupe key
                    0,       // dupe score
                    "SCORE", // dupe mode
                ]),
            )
            .await?;

        if nzb_id <= 0 {
            return Err(DownloadClientError::Rejected(format!(
                "append returned {}",
                nzb_id
            )));
        }
        Ok(nzb_id.to_string())
    }

    async fn status(&self, backend_item_id: &str) -> Result<BackendStatus, DownloadClientError> {
        let wanted: i64 = backend_item_id.parse().map_err(|_| {
            DownloadClientError::Protocol(format!("non-numeric NZBGet id {:?}", backend_item_id))
        })?;

        let groups: Vec<GroupItem> = self.rpc("listgroups", json!([0])).await?;
        if let Some(group) = groups.iter().find(|g| g.nzb_id == wanted) {
            return Ok(BackendStatus {
                status: map_group_status(&group.status),
                output_path: None,
                error: None,
            });
        }

        let history: Vec<HistoryItem> = self.rpc("history", json!([false])).await?;
        if let Some(item) = history.iter().find(|h| h.nzb_id == wanted) {
            return Ok(map_history_item(item));
        }

        Err(DownloadClientError::NotFound(backend_item_id.to_string()))
    }
}

fn map_group_status(status: &str) -> DownloadStatus {
    match status {
        "QUEUED" | "PAUSED" => DownloadStatus::Queued,
        // DOWNLOADING, FETCHING and all post-processing states
        _ => DownloadStatus::Downloading,
    }
}

/// History statuses are `CATEGORY/DETAIL`, e.g. `SUCCESS/UNPACK` or
/// `FAILURE/PAR`. Anything but SUCCESS is treated as a failure.
fn map_history_item(item: &HistoryItem) -> BackendStatus {
    let success = item.status.starts_with("SUCCESS");
    if success {
        let path = if item.final_dir.is_empty() {
            &item.dest_dir
        } else {
            &item.final_dir
        };
        BackendStatus {
            status: DownloadStatus::Completed,
            output_path: Some(path.clone()).filter(|p| !p.is_empty()),
            error: None,
        }
    } else {
        BackendStatus {
            status: DownloadStatus::Failed,
            output_path: None,
            error: Some(item.status.clone()),
        }
    }
}
