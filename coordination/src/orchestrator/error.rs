//! Orchestrator error types
//!
//! Per-target outcomes never surface here: they are categories handled by
//! the escalation policy. Only faults that make the campaign state
//! untrustworthy are errors, and they halt the affected tier only.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::{TargetId, Tier};

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The ledger refused an attempt; the target was not moved
    #[error("Ledger write failed for {target} at {tier}: {source}")]
    LedgerWrite {
        target: TargetId,
        tier: Tier,
        #[source]
        source: StoreError,
    },

    /// Queue state disagrees with itself; never auto-healed
    #[error("Queue invariant violated at {tier}: {source}")]
    QueueInvariant {
        tier: Tier,
        #[source]
        source: StoreError,
    },

    /// Tiers up to the final tier without a processor of the right shape
    #[error("No processor registered for {0:?}")]
    MissingProcessors(Vec<Tier>),

    /// Any other store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    /// Map a queue operation failure at `tier`
    pub(crate) fn queue(tier: Tier, source: StoreError) -> Self {
        match source {
            StoreError::InvariantViolation { .. } => Self::QueueInvariant { tier, source },
            other => Self::Store(other),
        }
    }

    /// Whether the error must halt the tier it happened on
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LedgerWrite { .. } | Self::QueueInvariant { .. } | Self::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_mapping() {
        let err = OrchestratorError::queue(
            Tier::Rendered,
            StoreError::invariant("d-1", "slot missing"),
        );
        assert!(matches!(err, OrchestratorError::QueueInvariant { tier: Tier::Rendered, .. }));
        assert!(err.is_fatal());

        let err = OrchestratorError::queue(Tier::Probe, StoreError::LockPoisoned);
        assert!(matches!(err, OrchestratorError::Store(StoreError::LockPoisoned)));

        let err = OrchestratorError::MissingProcessors(vec![Tier::Search]);
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("Search"));
    }
}
