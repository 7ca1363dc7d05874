//! Block/failure classifier
//!
//! Maps a processor's raw outcome to one of the six outcome categories.
//! Deterministic and side-effect free: the same input always yields the
//! same category, independent of network state.
//!
//! `security_block` is only asserted from explicit signals: a 403/429 that
//! carries a WAF or CAPTCHA marker, or a body that is itself a challenge
//! page. A bare 403 is a transient error, never a block.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::processor::RawOutcome;
use crate::types::{Category, Diagnostics};

/// Markers that only appear on interstitial challenge pages
static CHALLENGE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(cf-chl|cf_chl_|challenge-platform|just a moment\.\.\.|checking your browser|g-recaptcha|h-captcha|hcaptcha|are you a robot|verify you are (a )?human|_incapsula_resource|px-captcha)",
    )
    .expect("CHALLENGE_MARKERS regex should compile")
});

/// WAF / bot-protection vendor markers (body or `server` header)
static WAF_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(cloudflare|captcha|attention required|access denied|incapsula|imperva|akamai|reference\s*#\s*[0-9a-f.]+|sucuri|request unsuccessful|web application firewall|bot protection|ddos-guard)",
    )
    .expect("WAF_MARKERS regex should compile")
});

static TIMEOUT_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(timed?[ _-]?out|deadline (has )?elapsed|deadline exceeded)")
        .expect("TIMEOUT_ERROR regex should compile")
});

/// Statuses that may carry a block when paired with a marker
const BLOCK_STATUSES: &[u16] = &[403, 429];

/// Configuration for the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Extractions below this confidence are `low_confidence`
    pub confidence_floor: f64,
    /// Max characters of body kept in diagnostics
    pub excerpt_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.7,
            excerpt_chars: 240,
        }
    }
}

/// Category plus the diagnostics recorded on the attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub confidence: Option<f64>,
    pub diagnostics: Diagnostics,
}

/// Deterministic outcome classifier
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, raw: &RawOutcome) -> Classification {
        match raw {
            RawOutcome::Extracted { result, .. } => {
                let confidence = if result.confidence.is_finite() {
                    result.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let category = if confidence >= self.config.confidence_floor {
                    Category::Success
                } else {
                    Category::LowConfidence
                };
                Classification {
                    category,
                    confidence: Some(confidence),
                    diagnostics: Diagnostics {
                        confidence: Some(confidence),
                        url: result.source_urls.first().cloned(),
                        ..Default::default()
                    },
                }
            }
            RawOutcome::Http {
                status,
                url,
                body_excerpt,
                server,
            } => {
                let category = classify_http(*status, body_excerpt.as_deref(), server.as_deref());
                Classification {
                    category,
                    confidence: None,
                    diagnostics: Diagnostics {
                        status: Some(*status),
                        error: body_excerpt.as_deref().map(|b| self.excerpt(b)),
                        url: Some(url.clone()),
                        ..Default::default()
                    },
                }
            }
            RawOutcome::Empty { url, detail, .. } => Classification {
                category: Category::NotFound,
                confidence: None,
                diagnostics: Diagnostics {
                    error: Some(self.excerpt(detail)),
                    url: url.clone(),
                    ..Default::default()
                },
            },
            RawOutcome::TimedOut { after_ms } => Classification {
                category: Category::Timeout,
                confidence: None,
                diagnostics: Diagnostics {
                    error: Some(format!("exceeded budget after {after_ms}ms")),
                    ..Default::default()
                },
            },
            RawOutcome::Failed { error } => {
                let category = if TIMEOUT_ERROR.is_match(error) {
                    Category::Timeout
                } else {
                    Category::TransientError
                };
                Classification {
                    category,
                    confidence: None,
                    diagnostics: Diagnostics {
                        error: Some(self.excerpt(error)),
                        ..Default::default()
                    },
                }
            }
        }
    }

    fn excerpt(&self, text: &str) -> String {
        text.chars().take(self.config.excerpt_chars).collect()
    }
}

/// Whether a fetched body is an anti-bot challenge page.
///
/// Processors use this to hand a 2xx challenge page back as an HTTP outcome
/// instead of parsing it.
pub fn is_challenge_page(body: &str) -> bool {
    CHALLENGE_MARKERS.is_match(body)
}

fn classify_http(status: u16, body: Option<&str>, server: Option<&str>) -> Category {
    let body = body.unwrap_or_default();

    // A challenge page is explicit regardless of status
    if is_challenge_page(body) {
        return Category::SecurityBlock;
    }

    if BLOCK_STATUSES.contains(&status) {
        let marked = WAF_MARKERS.is_match(body) || server.is_some_and(|s| WAF_MARKERS.is_match(s));
        return if marked {
            Category::SecurityBlock
        } else {
            Category::TransientError
        };
    }

    match status {
        404 | 410 => Category::NotFound,
        408 | 504 => Category::Timeout,
        200..=299 => Category::NotFound,
        _ => Category::TransientError,
    }
}
