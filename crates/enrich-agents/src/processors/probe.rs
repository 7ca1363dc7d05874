//! Tier 1: fetch the homepage and probe likely schedule pages

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use coordination::processor::{RawOutcome, TierProcessor};
use coordination::{Target, Tier};

use super::links::{origin, page_links};
use super::{collaborator_failure, extracted, is_missing, refusal};
use crate::clients::{FetchMode, PageFetcher};
use crate::config::CrawlConfig;
use crate::schedule_text::{html_to_text, parse_schedule};

/// Paths districts commonly publish schedules under
const COMMON_PATHS: &[&str] = &[
    "/bell-schedule",
    "/bell-schedules",
    "/school-hours",
    "/schedules",
    "/about/bell-schedule",
];

pub struct ProbeProcessor {
    fetcher: Arc<dyn PageFetcher>,
    config: CrawlConfig,
}

impl ProbeProcessor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: CrawlConfig) -> Self {
        Self { fetcher, config }
    }
}

#[async_trait]
impl TierProcessor for ProbeProcessor {
    fn tier(&self) -> Tier {
        Tier::Probe
    }

    async fn process(&self, target: &Target) -> RawOutcome {
        let Some(home) = target.homepage.as_deref() else {
            return RawOutcome::Empty {
                url: None,
                detail: "no homepage on record".to_string(),
                discovered_urls: vec![],
            };
        };
        let timeout = self.config.page_timeout();

        let page = match self.fetcher.fetch(home, FetchMode::Raw, timeout).await {
            Ok(page) => page,
            Err(e) => return collaborator_failure(&e),
        };
        if let Some(outcome) = refusal(home, &page) {
            return outcome;
        }

        let links = page_links(home, &page.html);
        let discovered: Vec<String> = links
            .subsites
            .iter()
            .chain(links.schedule.iter())
            .cloned()
            .collect();

        if let Some(parsed) = parse_schedule(&html_to_text(&page.html)) {
            return extracted(Tier::Probe, parsed, home, discovered);
        }

        let mut candidates = links.schedule.clone();
        if let Some(origin) = origin(home) {
            for path in COMMON_PATHS {
                let url = format!("{origin}{path}");
                if !candidates.contains(&url) {
                    candidates.push(url);
                }
            }
        }

        let mut probed = 0;
        for url in candidates.iter().take(self.config.max_probe_pages) {
            probed += 1;
            let page = match self.fetcher.fetch(url, FetchMode::Raw, timeout).await {
                Ok(page) => page,
                Err(e) => {
                    debug!(url = %url, error = %e, "Candidate fetch failed");
                    continue;
                }
            };
            if let Some(outcome) = refusal(url, &page) {
                if is_missing(&outcome) {
                    continue;
                }
                return outcome;
            }
            if let Some(parsed) = parse_schedule(&html_to_text(&page.html)) {
                return extracted(Tier::Probe, parsed, url, discovered);
            }
        }

        RawOutcome::Empty {
            url: Some(home.to_string()),
            detail: format!("no schedule on homepage or {probed} candidate pages"),
            discovered_urls: discovered,
        }
    }
}
