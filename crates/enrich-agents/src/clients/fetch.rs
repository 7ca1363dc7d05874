//! Rendering/fetch collaborator (tiers 1 and 2)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CollaboratorResult, Endpoint};
use crate::config::EndpointConfig;

/// Plain HTTP fetch or a full headless render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    Raw,
    Rendered,
}

/// What the fetch collaborator saw at the target site.
///
/// `status` is the target site's status, not the collaborator's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    #[serde(default)]
    pub html: String,
    /// Visible text after rendering (empty for raw fetches)
    #[serde(default)]
    pub rendered_text: String,
    /// `server` header from the target site
    #[serde(default)]
    pub server: Option<String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        mode: FetchMode,
        timeout: Duration,
    ) -> CollaboratorResult<FetchResponse>;
}

#[derive(Serialize)]
struct FetchRequest<'a> {
    url: &'a str,
    mode: FetchMode,
    timeout_ms: u64,
}

/// Client for the rendering/fetch service
pub struct FetchClient {
    endpoint: Endpoint,
}

impl FetchClient {
    pub fn new(config: &EndpointConfig, token: Option<&str>) -> CollaboratorResult<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, token)?,
        })
    }
}

#[async_trait]
impl PageFetcher for FetchClient {
    async fn fetch(
        &self,
        url: &str,
        mode: FetchMode,
        timeout: Duration,
    ) -> CollaboratorResult<FetchResponse> {
        debug!(url, ?mode, "Fetching page");
        let request = FetchRequest {
            url,
            mode,
            timeout_ms: timeout.as_millis() as u64,
        };
        // Leave the service room to report its own timeout
        let deadline = timeout.max(self.endpoint.timeout());
        self.endpoint.post_json("/fetch", &request, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CollaboratorError;

    fn config(url: String) -> EndpointConfig {
        EndpointConfig {
            url,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_fetch_decodes_target_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fetch")
            .match_header("authorization", "Bearer k")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "url": "https://district.org",
                "mode": "rendered"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": 404, "html": "<h1>Not Found</h1>", "server": "nginx"}"#)
            .create_async()
            .await;

        let client = FetchClient::new(&config(server.url()), Some("k")).unwrap();
        let resp = client
            .fetch("https://district.org", FetchMode::Rendered, Duration::from_secs(2))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(resp.status, 404);
        assert!(!resp.is_success());
        assert_eq!(resp.server.as_deref(), Some("nginx"));
        assert!(resp.rendered_text.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_maps_service_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/fetch")
            .with_status(502)
            .with_body("renderer pool exhausted")
            .create_async()
            .await;

        let client = FetchClient::new(&config(server.url()), None).unwrap();
        let err = client
            .fetch("https://district.org", FetchMode::Raw, Duration::from_secs(2))
            .await
            .unwrap_err();
        match err {
            CollaboratorError::Api { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "renderer pool exhausted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
