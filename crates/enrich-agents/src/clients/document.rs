//! Document text collaborator (tier 3)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CollaboratorResult, Endpoint};
use crate::config::EndpointConfig;

/// How the text was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMethod {
    Native,
    Ocr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentText {
    pub text: String,
    pub method: TextMethod,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, document_url: &str) -> CollaboratorResult<DocumentText>;
}

/// Client for the PDF/OCR text service
pub struct DocumentClient {
    endpoint: Endpoint,
}

impl DocumentClient {
    pub fn new(config: &EndpointConfig, token: Option<&str>) -> CollaboratorResult<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, token)?,
        })
    }
}

#[async_trait]
impl TextExtractor for DocumentClient {
    async fn extract_text(&self, document_url: &str) -> CollaboratorResult<DocumentText> {
        debug!(url = document_url, "Extracting document text");
        let body = serde_json::json!({ "url": document_url });
        self.endpoint
            .post_json("/extract-text", &body, self.endpoint.timeout())
            .await
    }
}
