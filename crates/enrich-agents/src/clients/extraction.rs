//! Costly-extraction collaborator (tier 4)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use coordination::BellSchedule;

use super::{BatchPayload, BatchResponse, CollaboratorResult, Endpoint};
use crate::config::EndpointConfig;

/// Per-member answer from the extraction service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionItem {
    pub target_id: String,
    /// `None` when the service found nothing usable
    #[serde(default)]
    pub extracted: Option<BellSchedule>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[async_trait]
pub trait BatchExtractor: Send + Sync {
    async fn extract_batch(&self, payload: &BatchPayload) -> CollaboratorResult<Vec<ExtractionItem>>;
}

pub struct ExtractionClient {
    endpoint: Endpoint,
}

impl ExtractionClient {
    pub fn new(config: &EndpointConfig, token: Option<&str>) -> CollaboratorResult<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, token)?,
        })
    }
}

#[async_trait]
impl BatchExtractor for ExtractionClient {
    async fn extract_batch(&self, payload: &BatchPayload) -> CollaboratorResult<Vec<ExtractionItem>> {
        debug!(batch = %payload.batch_id, size = payload.members.len(), "Calling extraction service");
        let resp: BatchResponse<ExtractionItem> = self
            .endpoint
            .post_json("/extract-batch", payload, self.endpoint.timeout())
            .await?;
        Ok(resp.results)
    }
}
