//! Escalation policy: deterministic decision-making for tier routing
//!
//! Consumes a queue entry and a classified observation to produce a
//! Decision. All decisions are deterministic: no clock, no randomness.

use serde::{Deserialize, Serialize};

use super::decision::{Action, Decision, EscalationReason};
use crate::types::{Category, QueueEntry, Tier};

/// Thresholds for the escalation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum confidence to stop with success
    pub confidence_threshold: f64,
    /// Accumulated not_found attempts (across tiers and URLs) before manual review
    pub not_found_limit: u32,
    /// Retries allowed per tier for timeout / transient / not_found
    pub retry_cap: u32,
    /// Last tier of the ladder; advancing past it means manual review
    pub final_tier: Tier,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            not_found_limit: 4,
            retry_cap: 1,
            final_tier: Tier::Search,
        }
    }
}

/// One classified attempt, as seen by the policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub category: Category,
    pub confidence: Option<f64>,
    /// not_found attempts in the target's ledger, including this one
    pub not_found_total: u32,
}

impl Observation {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            confidence: None,
            not_found_total: u32::from(category == Category::NotFound),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_not_found_total(mut self, total: u32) -> Self {
        self.not_found_total = total;
        self
    }
}

/// The escalation policy, total over every category and tier
#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    config: PolicyConfig,
}

impl EscalationPolicy {
    /// Create a policy with default thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom thresholds
    pub fn with_config(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide what happens to `entry` after `observation`.
    ///
    /// Order matters: a block always wins, then acceptance, then the
    /// accumulated not_found limit, then retries, then escalation.
    pub fn decide(&self, entry: &QueueEntry, observation: &Observation) -> Decision {
        let cfg = &self.config;
        let category = observation.category;

        match category {
            Category::SecurityBlock => Decision::new(
                Action::StopBlocked,
                EscalationReason::SecurityBlock { tier: entry.tier },
            ),
            Category::Success => match observation.confidence {
                Some(confidence) if confidence >= cfg.confidence_threshold => Decision::new(
                    Action::StopSuccess,
                    EscalationReason::Accepted {
                        confidence,
                        threshold: cfg.confidence_threshold,
                    },
                ),
                confidence => self.advance(
                    entry,
                    category,
                    EscalationReason::WeakSignal {
                        confidence,
                        threshold: cfg.confidence_threshold,
                    },
                ),
            },
            Category::NotFound if observation.not_found_total >= cfg.not_found_limit => {
                Decision::new(
                    Action::StopManualReview,
                    EscalationReason::NotFoundLimit {
                        count: observation.not_found_total,
                        limit: cfg.not_found_limit,
                    },
                )
            }
            Category::Timeout | Category::TransientError | Category::NotFound => {
                if entry.consecutive_failures < cfg.retry_cap {
                    Decision::new(
                        Action::RetrySameTier,
                        EscalationReason::RetryScheduled {
                            category,
                            failures: entry.consecutive_failures,
                            cap: cfg.retry_cap,
                        },
                    )
                } else {
                    self.advance(
                        entry,
                        category,
                        EscalationReason::RetriesExhausted {
                            category,
                            cap: cfg.retry_cap,
                        },
                    )
                }
            }
            Category::LowConfidence => self.advance(
                entry,
                category,
                EscalationReason::WeakSignal {
                    confidence: observation.confidence,
                    threshold: cfg.confidence_threshold,
                },
            ),
        }
    }

    /// Advance, or stop for manual review when there is nowhere to go
    fn advance(&self, entry: &QueueEntry, category: Category, reason: EscalationReason) -> Decision {
        match entry.tier.next() {
            Some(next) if entry.tier < self.config.final_tier => {
                Decision::new(Action::AdvanceTier { to: next }, reason)
            }
            _ => Decision::new(
                Action::StopManualReview,
                EscalationReason::FinalTierExhausted {
                    tier: entry.tier,
                    category,
                },
            ),
        }
    }
}
