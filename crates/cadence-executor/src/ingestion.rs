use std::time::Duration;

use async_trait::async_trait;
use cadence_core::SyncType;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::IngestionError;

/// Body of an incremental-sync request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub tenant_id: String,
    pub sync_type: SyncType,
    /// `None` only for a tenant's very first sync.
    pub since_watermark: Option<String>,
}

/// What the collaborator reports after a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutput {
    pub new_watermark: String,
    pub item_count: u64,
}

/// The ingestion pipeline that fetches tenant data and writes it to the
/// relational and vector stores. Consumed, not implemented, here.
///
/// Implementations must tolerate concurrent calls for different tenants.
#[async_trait]
pub trait IngestionClient: Send + Sync {
    /// Stable lowercase identifier used in logs (e.g. `"http"`).
    fn name(&self) -> &str;

    async fn run_incremental_sync(&self, req: &SyncRequest) -> Result<SyncOutput, IngestionError>;
}

/// Ingestion collaborator reached over HTTP: `POST {endpoint}/sync`.
pub struct HttpIngestionClient {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpIngestionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, IngestionError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }
}

#[async_trait]
impl IngestionClient for HttpIngestionClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn run_incremental_sync(&self, req: &SyncRequest) -> Result<SyncOutput, IngestionError> {
        let url = format!("{}/sync", self.endpoint);
        debug!(tenant_id = %req.tenant_id, sync_type = %req.sync_type, "sending sync request");

        let mut builder = self.client.post(&url).json(req);
        if let Some(ref token) = self.api_token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await.map_err(|e| {
            // Surface connection errors as Unavailable: the next fire retries them.
            if e.is_connect() || e.is_timeout() {
                IngestionError::Unavailable(e.to_string())
            } else {
                IngestionError::Http(e)
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "ingestion API error");
            return Err(IngestionError::Api {
                status,
                message: text,
            });
        }

        resp.json::<SyncOutput>()
            .await
            .map_err(|e| IngestionError::Parse(e.to_string()))
    }
}
