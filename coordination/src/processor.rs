//! Tier processor and sink seams
//!
//! Processors are pure `target -> outcome` strategies. They never touch the
//! ledger or queue; the orchestrator owns every state transition. Sinks
//! receive terminal artifacts exactly once per target.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::types::{AttemptSummary, ExtractedResult, Target, TargetId, Tier};

/// What a processor observed, before classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawOutcome {
    /// A schedule was extracted
    Extracted {
        result: ExtractedResult,
        #[serde(default)]
        discovered_urls: Vec<String>,
    },
    /// The source answered with a non-success HTTP response
    Http {
        status: u16,
        url: String,
        #[serde(default)]
        body_excerpt: Option<String>,
        /// `server` response header, if any
        #[serde(default)]
        server: Option<String>,
    },
    /// Fetched fine, but nothing schedule-like was found
    Empty {
        url: Option<String>,
        detail: String,
        #[serde(default)]
        discovered_urls: Vec<String>,
    },
    /// The unit of work exceeded its wall-clock budget
    TimedOut { after_ms: u64 },
    /// Any other failure (connection reset, DNS, collaborator error)
    Failed { error: String },
}

impl RawOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    /// URLs the processor discovered along the way
    pub fn discovered_urls(&self) -> &[String] {
        match self {
            Self::Extracted {
                discovered_urls, ..
            }
            | Self::Empty {
                discovered_urls, ..
            } => discovered_urls,
            _ => &[],
        }
    }

    /// The extracted result, if any
    pub fn result(&self) -> Option<&ExtractedResult> {
        match self {
            Self::Extracted { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Single-target strategy (tiers 1–3)
#[async_trait]
pub trait TierProcessor: Send + Sync {
    fn tier(&self) -> Tier;

    async fn process(&self, target: &Target) -> RawOutcome;
}

/// Batched strategy (tiers 4–5).
///
/// Returns one outcome per member. Members missing from the returned list
/// are recorded as failures by the orchestrator.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    fn tier(&self) -> Tier;

    async fn process_batch(&self, batch: &Batch) -> Vec<(TargetId, RawOutcome)>;
}

/// Error type for sink operations
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

/// Receives the final result for a target that stopped with success
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, target_id: &str, result: &ExtractedResult) -> Result<(), SinkError>;
}

/// Receives targets that stopped for manual review or were blocked
#[async_trait]
pub trait ReviewSink: Send + Sync {
    async fn flag(
        &self,
        target_id: &str,
        reason: &str,
        summary: &AttemptSummary,
    ) -> Result<(), SinkError>;
}

/// Processors registered per tier
#[derive(Clone, Default)]
pub struct ProcessorSet {
    single: BTreeMap<Tier, Arc<dyn TierProcessor>>,
    batched: BTreeMap<Tier, Arc<dyn BatchProcessor>>,
}

impl ProcessorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-target processor under its own tier
    pub fn with_processor(mut self, processor: Arc<dyn TierProcessor>) -> Self {
        self.single.insert(processor.tier(), processor);
        self
    }

    /// Register a batch processor under its own tier
    pub fn with_batch_processor(mut self, processor: Arc<dyn BatchProcessor>) -> Self {
        self.batched.insert(processor.tier(), processor);
        self
    }

    pub fn single(&self, tier: Tier) -> Option<&Arc<dyn TierProcessor>> {
        self.single.get(&tier)
    }

    pub fn batched(&self, tier: Tier) -> Option<&Arc<dyn BatchProcessor>> {
        self.batched.get(&tier)
    }

    /// Whether `tier` has a processor of the right shape
    pub fn has(&self, tier: Tier) -> bool {
        if tier.is_batched() {
            self.batched.contains_key(&tier)
        } else {
            self.single.contains_key(&tier)
        }
    }

    /// Tiers up to and including `final_tier` that lack a processor
    pub fn missing_up_to(&self, final_tier: Tier) -> Vec<Tier> {
        Tier::ALL
            .into_iter()
            .filter(|t| *t <= final_tier && !self.has(*t))
            .collect()
    }
}

impl std::fmt::Debug for ProcessorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorSet")
            .field("single", &self.single.keys().collect::<Vec<_>>())
            .field("batched", &self.batched.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(Tier);

    #[async_trait]
    impl TierProcessor for Noop {
        fn tier(&self) -> Tier {
            self.0
        }

        async fn process(&self, _target: &Target) -> RawOutcome {
            RawOutcome::failed("noop")
        }
    }

    #[test]
    fn test_missing_processors_up_to_final_tier() {
        let set = ProcessorSet::new()
            .with_processor(Arc::new(Noop(Tier::Probe)))
            // wrong shape: a single-target processor cannot serve a batched tier
            .with_processor(Arc::new(Noop(Tier::Extraction)));

        assert!(set.has(Tier::Probe));
        assert!(!set.has(Tier::Extraction));
        assert_eq!(
            set.missing_up_to(Tier::Document),
            vec![Tier::Rendered, Tier::Document]
        );
    }

    #[test]
    fn test_raw_outcome_tagging() {
        let raw = RawOutcome::Http {
            status: 404,
            url: "https://example.org/bell".to_string(),
            body_excerpt: None,
            server: None,
        };
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["kind"], "http");
        assert!(raw.discovered_urls().is_empty());
        assert!(raw.result().is_none());
    }
}
