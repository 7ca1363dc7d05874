//! HTTP clients for the external collaborators.
//!
//! Each collaborator sits behind a small async trait so tier processors
//! can be exercised against fakes; the `reqwest` clients here are the
//! production implementations.
//!
//! | Trait           | Client             | Endpoint              | Tiers |
//! |-----------------|--------------------|-----------------------|-------|
//! | `PageFetcher`   | `FetchClient`      | `POST /fetch`         | 1, 2  |
//! | `TextExtractor` | `DocumentClient`   | `POST /extract-text`  | 3     |
//! | `BatchExtractor`| `ExtractionClient` | `POST /extract-batch` | 4     |
//! | `BatchSearcher` | `SearchClient`     | `POST /search-batch`  | 5     |

mod document;
mod extraction;
mod fetch;
mod search;

pub use document::{DocumentClient, DocumentText, TextExtractor, TextMethod};
pub use extraction::{BatchExtractor, ExtractionClient, ExtractionItem};
pub use fetch::{FetchClient, FetchMode, FetchResponse, PageFetcher};
pub use search::{BatchSearcher, SearchClient, SearchItem};

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use coordination::{Batch, Tier};

use crate::config::{CollaboratorConfig, EndpointConfig};

/// Errors talking to a collaborator service
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("collaborator returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode collaborator response: {0}")]
    Decode(String),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// One configured collaborator endpoint.
///
/// Base URL is normalized without a trailing slash. The API key, if any,
/// is sent as a bearer token.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl Endpoint {
    pub(crate) fn new(config: &EndpointConfig, token: Option<&str>) -> CollaboratorResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("enrich-agents/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            timeout,
        })
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a JSON body and decode a JSON response
    pub(crate) async fn post_json<B, R>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> CollaboratorResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let endpoint = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&endpoint).timeout(timeout).json(body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::TimedOut(timeout)
            } else {
                CollaboratorError::Http(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| CollaboratorError::Decode(e.to_string()))
    }
}

/// Response envelope shared by the batch endpoints
#[derive(Debug, Deserialize)]
pub(crate) struct BatchResponse<T> {
    pub results: Vec<T>,
}

/// One batch member as sent to a costly collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadMember {
    pub target_id: String,
    pub name: String,
    pub state: String,
    /// Homepage first, then discovered sub-sites
    pub urls: Vec<String>,
}

/// Request body for the batch extraction and batch search endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub batch_id: String,
    pub tier: Tier,
    /// Shared grouping key (platform or state)
    pub key: String,
    pub members: Vec<PayloadMember>,
}

impl BatchPayload {
    pub fn from_batch(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id.clone(),
            tier: batch.tier,
            key: batch.key.clone(),
            members: batch
                .members
                .iter()
                .map(|t| PayloadMember {
                    target_id: t.id.clone(),
                    name: t.name.clone(),
                    state: t.state.clone(),
                    urls: t.known_urls().into_iter().map(String::from).collect(),
                })
                .collect(),
        }
    }
}

/// Every collaborator the tier processors need
#[derive(Clone)]
pub struct Clients {
    pub fetch: Arc<dyn PageFetcher>,
    pub documents: Arc<dyn TextExtractor>,
    pub extraction: Arc<dyn BatchExtractor>,
    pub search: Arc<dyn BatchSearcher>,
}

impl Clients {
    /// Build the HTTP clients from configuration
    pub fn from_config(config: &CollaboratorConfig) -> CollaboratorResult<Self> {
        let token = config.api_key.as_deref();
        Ok(Self {
            fetch: Arc::new(FetchClient::new(&config.fetch, token)?),
            documents: Arc::new(DocumentClient::new(&config.document, token)?),
            extraction: Arc::new(ExtractionClient::new(&config.extraction, token)?),
            search: Arc::new(SearchClient::new(&config.search, token)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::Target;

    #[test]
    fn test_payload_from_batch_keeps_member_order_and_urls() {
        let mut first = Target::new("d-1", "Alpha USD", "CA").with_homepage("https://alpha.org");
        first.append_discovered(vec!["https://alpha.org/hs".to_string()]);
        let second = Target::new("d-2", "Beta USD", "CA");
        let batch = Batch {
            id: "b-1".to_string(),
            tier: Tier::Search,
            key: "CA".to_string(),
            members: vec![first, second],
        };

        let payload = BatchPayload::from_batch(&batch);
        assert_eq!(payload.batch_id, "b-1");
        assert_eq!(payload.members.len(), 2);
        assert_eq!(
            payload.members[0].urls,
            vec!["https://alpha.org", "https://alpha.org/hs"]
        );
        assert!(payload.members[1].urls.is_empty());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["members"][1]["target_id"], "d-2");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = EndpointConfig {
            url: "http://renderer:3000/".to_string(),
            timeout_secs: 5,
        };
        let endpoint = Endpoint::new(&config, Some("secret")).unwrap();
        assert_eq!(endpoint.base_url, "http://renderer:3000");
        assert_eq!(endpoint.timeout(), Duration::from_secs(5));
    }
}
