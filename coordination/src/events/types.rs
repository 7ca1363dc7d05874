//! Event types for enrichment campaigns
//!
//! Published on every state transition so dashboards and tests can watch a
//! campaign without reading the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BatchId, Category, TargetId, TerminalFlag, Tier};

/// All enrichment campaign events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrichmentEvent {
    /// A target was imported and queued at the first tier
    TargetImported {
        target_id: TargetId,
        timestamp: DateTime<Utc>,
    },

    /// An attempt was durably written to the ledger
    AttemptRecorded {
        target_id: TargetId,
        attempt_id: String,
        tier: Tier,
        category: Category,
        batch_id: Option<BatchId>,
        timestamp: DateTime<Utc>,
    },

    /// A target moved to a more expensive tier
    TierAdvanced {
        target_id: TargetId,
        from: Tier,
        to: Tier,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A target was re-queued at the same tier
    RetryScheduled {
        target_id: TargetId,
        tier: Tier,
        failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// A target reached a terminal state
    TargetFinished {
        target_id: TargetId,
        tier: Tier,
        flag: TerminalFlag,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A batch was handed to a costly-tier processor
    BatchDispatched {
        batch_id: BatchId,
        tier: Tier,
        key: String,
        size: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tier's workers stopped on a fatal fault
    TierHalted {
        tier: Tier,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl EnrichmentEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TargetImported { timestamp, .. }
            | Self::AttemptRecorded { timestamp, .. }
            | Self::TierAdvanced { timestamp, .. }
            | Self::RetryScheduled { timestamp, .. }
            | Self::TargetFinished { timestamp, .. }
            | Self::BatchDispatched { timestamp, .. }
            | Self::TierHalted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TargetImported { .. } => "target_imported",
            Self::AttemptRecorded { .. } => "attempt_recorded",
            Self::TierAdvanced { .. } => "tier_advanced",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::TargetFinished { .. } => "target_finished",
            Self::BatchDispatched { .. } => "batch_dispatched",
            Self::TierHalted { .. } => "tier_halted",
        }
    }

    /// Target this event concerns, if it concerns one
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Self::TargetImported { target_id, .. }
            | Self::AttemptRecorded { target_id, .. }
            | Self::TierAdvanced { target_id, .. }
            | Self::RetryScheduled { target_id, .. }
            | Self::TargetFinished { target_id, .. } => Some(target_id),
            Self::BatchDispatched { .. } | Self::TierHalted { .. } => None,
        }
    }

    /// Tier this event concerns, if any
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::AttemptRecorded { tier, .. }
            | Self::RetryScheduled { tier, .. }
            | Self::TargetFinished { tier, .. }
            | Self::BatchDispatched { tier, .. }
            | Self::TierHalted { tier, .. } => Some(*tier),
            Self::TierAdvanced { to, .. } => Some(*to),
            Self::TargetImported { .. } => None,
        }
    }
}
