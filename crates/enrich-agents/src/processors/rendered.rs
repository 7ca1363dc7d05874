//! Tier 2: render every known page and parse the visible text

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use coordination::processor::{RawOutcome, TierProcessor};
use coordination::{Target, Tier};

use super::links::page_links;
use super::{collaborator_failure, extracted, is_missing, keep_best, refusal};
use crate::clients::{FetchMode, PageFetcher};
use crate::config::CrawlConfig;
use crate::schedule_text::{html_to_text, parse_schedule};

pub struct RenderedProcessor {
    fetcher: Arc<dyn PageFetcher>,
    config: CrawlConfig,
}

impl RenderedProcessor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: CrawlConfig) -> Self {
        Self { fetcher, config }
    }
}

#[async_trait]
impl TierProcessor for RenderedProcessor {
    fn tier(&self) -> Tier {
        Tier::Rendered
    }

    async fn process(&self, target: &Target) -> RawOutcome {
        let urls = target.known_urls();
        if urls.is_empty() {
            return RawOutcome::Empty {
                url: None,
                detail: "no known URLs to render".to_string(),
                discovered_urls: vec![],
            };
        }
        let timeout = self.config.page_timeout();

        let mut best = None;
        let mut first_failure = None;
        let mut rendered = 0;
        let mut discovered = Vec::new();

        for url in urls.iter().take(self.config.max_rendered_pages) {
            let page = match self.fetcher.fetch(url, FetchMode::Rendered, timeout).await {
                Ok(page) => page,
                Err(e) => {
                    debug!(url = %url, error = %e, "Render failed");
                    first_failure.get_or_insert_with(|| collaborator_failure(&e));
                    continue;
                }
            };
            if let Some(outcome) = refusal(url, &page) {
                if !is_missing(&outcome) {
                    return outcome;
                }
                first_failure.get_or_insert(outcome);
                continue;
            }
            rendered += 1;

            let text = if page.rendered_text.trim().is_empty() {
                html_to_text(&page.html)
            } else {
                page.rendered_text.clone()
            };
            if let Some(parsed) = parse_schedule(&text) {
                keep_best(&mut best, parsed, url);
            }
            // Script-built navigation only shows up after rendering
            for link in page_links(url, &page.html).schedule {
                if !urls.contains(&link.as_str()) && !discovered.contains(&link) {
                    discovered.push(link);
                }
            }
        }

        if let Some((parsed, url)) = best {
            return extracted(Tier::Rendered, parsed, &url, discovered);
        }
        match first_failure {
            Some(outcome) if rendered == 0 => outcome,
            _ => RawOutcome::Empty {
                url: urls.first().map(|u| u.to_string()),
                detail: format!("no time ranges in {rendered} rendered pages"),
                discovered_urls: discovered,
            },
        }
    }
}
