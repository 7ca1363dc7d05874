//! Tier 3: read linked PDFs and images through the document collaborator

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use coordination::processor::{RawOutcome, TierProcessor};
use coordination::{Target, Tier};

use super::links::page_links;
use super::{collaborator_failure, extracted, is_missing, keep_best, refusal};
use crate::clients::{FetchMode, PageFetcher, TextExtractor, TextMethod};
use crate::config::CrawlConfig;
use crate::schedule_text::parse_schedule;

/// OCR output is noisier than native text
const OCR_CONFIDENCE_FACTOR: f64 = 0.9;

pub struct DocumentProcessor {
    fetcher: Arc<dyn PageFetcher>,
    documents: Arc<dyn TextExtractor>,
    config: CrawlConfig,
}

impl DocumentProcessor {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        documents: Arc<dyn TextExtractor>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            fetcher,
            documents,
            config,
        }
    }

    /// Linked documents across the target's known pages, schedule-like first
    async fn find_documents(&self, target: &Target) -> Result<Vec<String>, RawOutcome> {
        let timeout = self.config.page_timeout();
        let mut hinted = Vec::new();

        for url in target.known_urls().into_iter().take(self.config.max_rendered_pages) {
            let page = match self.fetcher.fetch(url, FetchMode::Raw, timeout).await {
                Ok(page) => page,
                Err(e) => {
                    debug!(url, error = %e, "Page fetch failed");
                    continue;
                }
            };
            if let Some(outcome) = refusal(url, &page) {
                if is_missing(&outcome) {
                    continue;
                }
                return Err(outcome);
            }
            for doc in page_links(url, &page.html).documents {
                if !hinted.contains(&doc) {
                    hinted.push(doc);
                }
            }
        }

        hinted.truncate(self.config.max_documents);
        Ok(hinted)
    }
}

#[async_trait]
impl TierProcessor for DocumentProcessor {
    fn tier(&self) -> Tier {
        Tier::Document
    }

    async fn process(&self, target: &Target) -> RawOutcome {
        let documents = match self.find_documents(target).await {
            Ok(docs) => docs,
            Err(refused) => return refused,
        };
        if documents.is_empty() {
            return RawOutcome::Empty {
                url: target.homepage.clone(),
                detail: "no linked documents".to_string(),
                discovered_urls: vec![],
            };
        }

        let mut best = None;
        let mut failures = 0;
        let mut last_failure = None;

        for doc in &documents {
            let text = match self.documents.extract_text(doc).await {
                Ok(text) => text,
                Err(e) => {
                    debug!(url = %doc, error = %e, "Document text extraction failed");
                    failures += 1;
                    last_failure = Some(e);
                    continue;
                }
            };
            if let Some(mut parsed) = parse_schedule(&text.text) {
                if text.method == TextMethod::Ocr {
                    parsed.confidence *= OCR_CONFIDENCE_FACTOR;
                }
                keep_best(&mut best, parsed, doc);
            }
        }

        if let Some((parsed, url)) = best {
            return extracted(Tier::Document, parsed, &url, vec![]);
        }
        match last_failure {
            Some(e) if failures == documents.len() => collaborator_failure(&e),
            _ => RawOutcome::Empty {
                url: documents.first().cloned(),
                detail: format!("no schedule in {} documents", documents.len()),
                discovered_urls: vec![],
            },
        }
    }
}
