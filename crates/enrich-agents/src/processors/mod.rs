//! Concrete tier processors.
//!
//! Tiers 1–3 crawl the target's own site through the fetch and document
//! collaborators and parse the text locally. Tiers 4–5 only package a batch
//! for a costly collaborator and unpack its per-member answers.
//!
//! A processor never retries and never decides: a refusal from the site is
//! handed back as an HTTP outcome and the classifier judges it. Once a site
//! refuses, the processor stops requesting further pages from it.

mod batch;
mod document;
mod links;
mod probe;
mod rendered;

pub use batch::{ExtractionProcessor, SearchProcessor};
pub use document::DocumentProcessor;
pub use links::{page_links, resolve, PageLinks};
pub use probe::ProbeProcessor;
pub use rendered::RenderedProcessor;

use std::sync::Arc;

use coordination::processor::{ProcessorSet, RawOutcome};
use coordination::{is_challenge_page, ExtractedResult, Tier};

use crate::clients::{Clients, CollaboratorError, FetchResponse};
use crate::config::CrawlConfig;
use crate::schedule_text::ParsedSchedule;

/// Body characters kept on an HTTP outcome for the classifier
const BODY_EXCERPT_CHARS: usize = 2048;

/// Register a processor for every tier
pub fn processor_set(clients: &Clients, crawl: &CrawlConfig) -> ProcessorSet {
    ProcessorSet::new()
        .with_processor(Arc::new(ProbeProcessor::new(
            clients.fetch.clone(),
            crawl.clone(),
        )))
        .with_processor(Arc::new(RenderedProcessor::new(
            clients.fetch.clone(),
            crawl.clone(),
        )))
        .with_processor(Arc::new(DocumentProcessor::new(
            clients.fetch.clone(),
            clients.documents.clone(),
            crawl.clone(),
        )))
        .with_batch_processor(Arc::new(ExtractionProcessor::new(
            clients.extraction.clone(),
        )))
        .with_batch_processor(Arc::new(SearchProcessor::new(clients.search.clone())))
}

/// A collaborator call that failed outright
pub(crate) fn collaborator_failure(err: &CollaboratorError) -> RawOutcome {
    match err {
        CollaboratorError::TimedOut(after) => RawOutcome::TimedOut {
            after_ms: after.as_millis() as u64,
        },
        other => RawOutcome::failed(other.to_string()),
    }
}

/// The site answered with something other than a readable page
pub(crate) fn refusal(url: &str, page: &FetchResponse) -> Option<RawOutcome> {
    if page.is_success() && !is_challenge_page(&page.html) {
        return None;
    }
    let body: String = page.html.chars().take(BODY_EXCERPT_CHARS).collect();
    Some(RawOutcome::Http {
        status: page.status,
        url: url.to_string(),
        body_excerpt: (!body.is_empty()).then_some(body),
        server: page.server.clone(),
    })
}

/// Plain absence rather than a refusal
pub(crate) fn is_missing(outcome: &RawOutcome) -> bool {
    matches!(outcome, RawOutcome::Http { status: 404 | 410, .. })
}

pub(crate) fn extracted(
    tier: Tier,
    parsed: ParsedSchedule,
    source_url: &str,
    discovered_urls: Vec<String>,
) -> RawOutcome {
    RawOutcome::Extracted {
        result: ExtractedResult {
            schedule: parsed.schedule,
            confidence: parsed.confidence,
            tier,
            source_urls: vec![source_url.to_string()],
        },
        discovered_urls,
    }
}

/// Keep the higher-confidence candidate
pub(crate) fn keep_best(best: &mut Option<(ParsedSchedule, String)>, parsed: ParsedSchedule, url: &str) {
    let better = best
        .as_ref()
        .map_or(true, |(current, _)| parsed.confidence > current.confidence);
    if better {
        *best = Some((parsed, url.to_string()));
    }
}

/// Shared fakes for processor tests
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::clients::{
        CollaboratorError, CollaboratorResult, DocumentText, FetchMode, FetchResponse,
        PageFetcher, TextExtractor,
    };

    /// Serves canned pages by URL; unknown URLs are 404s
    #[derive(Default)]
    pub struct FakeSite {
        pages: HashMap<String, FetchResponse>,
        pub requested: Mutex<Vec<(String, FetchMode)>>,
    }

    impl FakeSite {
        pub fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                FetchResponse {
                    status: 200,
                    html: html.to_string(),
                    ..Default::default()
                },
            );
            self
        }

        pub fn response(mut self, url: &str, response: FetchResponse) -> Self {
            self.pages.insert(url.to_string(), response);
            self
        }

        pub fn requested_urls(&self) -> Vec<String> {
            self.requested
                .lock()
                .unwrap()
                .iter()
                .map(|(u, _)| u.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeSite {
        async fn fetch(
            &self,
            url: &str,
            mode: FetchMode,
            _timeout: Duration,
        ) -> CollaboratorResult<FetchResponse> {
            self.requested.lock().unwrap().push((url.to_string(), mode));
            Ok(self.pages.get(url).cloned().unwrap_or(FetchResponse {
                status: 404,
                html: "Not Found".to_string(),
                ..Default::default()
            }))
        }
    }

    /// Serves canned document text by URL; unknown URLs fail
    #[derive(Default)]
    pub struct FakeDocuments {
        docs: HashMap<String, DocumentText>,
    }

    impl FakeDocuments {
        pub fn doc(mut self, url: &str, text: DocumentText) -> Self {
            self.docs.insert(url.to_string(), text);
            self
        }
    }

    #[async_trait]
    impl TextExtractor for FakeDocuments {
        async fn extract_text(&self, document_url: &str) -> CollaboratorResult<DocumentText> {
            self.docs
                .get(document_url)
                .cloned()
                .ok_or_else(|| CollaboratorError::Api {
                    status: 422,
                    message: "unreadable document".to_string(),
                })
        }
    }
}
