//! Costly-search collaborator (tier 5)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use coordination::BellSchedule;

use super::{BatchPayload, BatchResponse, CollaboratorResult, Endpoint};
use crate::config::EndpointConfig;

/// Per-member answer from the search service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub target_id: String,
    pub found: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub extracted: Option<BellSchedule>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[async_trait]
pub trait BatchSearcher: Send + Sync {
    async fn search_batch(&self, payload: &BatchPayload) -> CollaboratorResult<Vec<SearchItem>>;
}

pub struct SearchClient {
    endpoint: Endpoint,
}

impl SearchClient {
    pub fn new(config: &EndpointConfig, token: Option<&str>) -> CollaboratorResult<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, token)?,
        })
    }
}

#[async_trait]
impl BatchSearcher for SearchClient {
    async fn search_batch(&self, payload: &BatchPayload) -> CollaboratorResult<Vec<SearchItem>> {
        debug!(batch = %payload.batch_id, key = %payload.key, "Calling search service");
        let resp: BatchResponse<SearchItem> = self
            .endpoint
            .post_json("/search-batch", payload, self.endpoint.timeout())
            .await?;
        Ok(resp.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CollaboratorError;
    use coordination::Tier;

    #[tokio::test]
    async fn test_undecodable_response_is_a_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/search-batch")
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create_async()
            .await;

        let client = SearchClient::new(
            &EndpointConfig {
                url: server.url(),
                timeout_secs: 5,
            },
            None,
        )
        .unwrap();
        let payload = BatchPayload {
            batch_id: "b-1".to_string(),
            tier: Tier::Search,
            key: "TX".to_string(),
            members: vec![],
        };

        let err = client.search_batch(&payload).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Decode(_)));
    }
}
