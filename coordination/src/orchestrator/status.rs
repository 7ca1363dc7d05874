//! Campaign status report
//!
//! Aggregate counts only. Per-target detail lives in the ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::{CampaignStore, StoreResult};
use crate::types::{Attempt, Category, QueueEntry, TerminalFlag, Tier};

/// Counts of targets by routing state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub pending: u64,
    pub succeeded: u64,
    pub manual_review: u64,
    pub blocked: u64,
}

impl TierCounts {
    pub fn add(&mut self, flag: TerminalFlag) {
        match flag {
            TerminalFlag::Pending => self.pending += 1,
            TerminalFlag::Succeeded => self.succeeded += 1,
            TerminalFlag::ManualReview => self.manual_review += 1,
            TerminalFlag::Blocked => self.blocked += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.succeeded + self.manual_review + self.blocked
    }

    pub fn terminal(&self) -> u64 {
        self.succeeded + self.manual_review + self.blocked
    }
}

/// Campaign-wide status.
///
/// A terminal target is counted at the tier it finished at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub per_tier: BTreeMap<Tier, TierCounts>,
    pub totals: TierCounts,
    pub per_category: BTreeMap<Category, u64>,
    pub attempts: u64,
    /// Sink calls that failed after a terminal transition
    pub sink_failures: u64,
}

impl StatusReport {
    pub fn build<'a>(
        entries: &[QueueEntry],
        attempts: impl IntoIterator<Item = &'a Attempt>,
        sink_failures: u64,
    ) -> Self {
        let mut report = Self {
            per_tier: Tier::ALL.iter().map(|t| (*t, TierCounts::default())).collect(),
            per_category: Category::ALL.iter().map(|c| (*c, 0)).collect(),
            sink_failures,
            ..Default::default()
        };

        for entry in entries {
            report.per_tier.entry(entry.tier).or_default().add(entry.flag);
            report.totals.add(entry.flag);
        }
        for attempt in attempts {
            *report.per_category.entry(attempt.category).or_insert(0) += 1;
            report.attempts += 1;
        }
        report
    }

    /// Read entries and every target's ledger from a store
    pub fn from_store(store: &dyn CampaignStore, sink_failures: u64) -> StoreResult<Self> {
        let entries = store.entries()?;
        let mut attempts = Vec::new();
        for entry in &entries {
            attempts.extend(store.history(&entry.target_id)?);
        }
        Ok(Self::build(&entries, &attempts, sink_failures))
    }

    /// No target is left pending
    pub fn is_complete(&self) -> bool {
        self.totals.pending == 0
    }
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:<16} {:>8} {:>10} {:>14} {:>8}",
            "tier", "pending", "succeeded", "manual_review", "blocked"
        )?;
        for (tier, c) in &self.per_tier {
            writeln!(
                f,
                "{:<16} {:>8} {:>10} {:>14} {:>8}",
                tier.to_string(),
                c.pending,
                c.succeeded,
                c.manual_review,
                c.blocked
            )?;
        }
        let t = &self.totals;
        writeln!(
            f,
            "{:<16} {:>8} {:>10} {:>14} {:>8}",
            "total", t.pending, t.succeeded, t.manual_review, t.blocked
        )?;
        writeln!(f)?;
        writeln!(f, "attempts: {}", self.attempts)?;
        for (category, count) in &self.per_category {
            writeln!(f, "  {:<16} {:>8}", category.to_string(), count)?;
        }
        if self.sink_failures > 0 {
            writeln!(f, "sink failures: {}", self.sink_failures)?;
        }
        Ok(())
    }
}
