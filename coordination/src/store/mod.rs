//! Durable campaign state: the attempt ledger plus the target queue
//!
//! Two shared mutable stores back a campaign, and every mutation goes
//! through the narrow [`CampaignStore`] contract:
//!
//! - **Ledger**: append-only [`Attempt`] history per target. Writes never
//!   fail silently; a failed `record` aborts the caller's step.
//! - **Queue**: exactly one [`QueueEntry`] per target. Pending entries sit
//!   in exactly one tier queue; terminal entries sit in none.
//!
//! # Backends
//!
//! - [`MemoryStore`]: default, one mutex over entries and tier indexes
//! - [`RocksStore`]: RocksDB column families, behind the `heavy-state` feature
//!
//! # Usage
//!
//! ```ignore
//! use coordination::store::{CampaignStore, MemoryStore};
//! use coordination::types::{Target, Tier};
//!
//! let store = MemoryStore::new();
//! store.put_target(&Target::new("d-1", "Springfield USD", "IL"))?;
//! store.enqueue("d-1", Tier::Probe)?;
//! let ready = store.dequeue_ready(Tier::Probe, 10)?;
//! ```

pub mod memory;
#[cfg(feature = "heavy-state")]
pub mod rocks;
pub mod schema;

use std::sync::Arc;

use crate::types::{Attempt, Category, QueueEntry, Target, TargetId, TerminalFlag, Tier};

pub use memory::MemoryStore;
#[cfg(feature = "heavy-state")]
pub use rocks::RocksStore;

/// Error type for campaign store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Duplicate target: {0}")]
    DuplicateTarget(TargetId),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Queue state disagrees with itself; never repaired automatically
    #[error("Queue invariant violated for {target}: {detail}")]
    InvariantViolation { target: TargetId, detail: String },
}

impl StoreError {
    pub fn invariant(target: &str, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            target: target.to_string(),
            detail: detail.into(),
        }
    }
}

/// Result type for campaign store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a campaign store
pub type SharedStore = Arc<dyn CampaignStore>;

/// Ledger + queue contract shared by every backend.
///
/// Queue transitions (`move_to_tier`, `retry_in_place`, `finish`) check
/// that the entry is pending at `tier` before touching it and report any
/// mismatch as [`StoreError::InvariantViolation`].
pub trait CampaignStore: Send + Sync {
    // ---- targets -----------------------------------------------------------

    /// Persist a new target; an existing id is [`StoreError::DuplicateTarget`]
    fn put_target(&self, target: &Target) -> StoreResult<()>;

    fn get_target(&self, target_id: &str) -> StoreResult<Option<Target>>;

    /// Every target, ordered by id
    fn list_targets(&self) -> StoreResult<Vec<Target>>;

    /// Append unseen discovered URLs; returns how many were added
    fn append_discovered(&self, target_id: &str, urls: &[String]) -> StoreResult<usize>;

    // ---- ledger ------------------------------------------------------------

    /// Append an attempt. Never fails silently.
    fn record(&self, attempt: &Attempt) -> StoreResult<()>;

    /// Attempts for a target in the order they were recorded
    fn history(&self, target_id: &str) -> StoreResult<Vec<Attempt>>;

    fn count_by_category(&self, target_id: &str, category: Category) -> StoreResult<u32> {
        let count = self
            .history(target_id)?
            .iter()
            .filter(|a| a.category == category)
            .count();
        Ok(count as u32)
    }

    // ---- queue -------------------------------------------------------------

    /// Place a target with no entry into `tier` as pending
    fn enqueue(&self, target_id: &str, tier: Tier) -> StoreResult<QueueEntry>;

    /// Claim up to `max` unclaimed pending entries at `tier`, FIFO by enqueue time
    fn dequeue_ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>>;

    /// Like `dequeue_ready` but claims nothing
    fn peek_ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>>;

    /// Whether any pending entry, claimed or not, sits at `tier`
    fn has_pending(&self, tier: Tier) -> StoreResult<bool> {
        Ok(self
            .entries()?
            .iter()
            .any(|e| e.tier == tier && e.is_pending()))
    }

    /// Atomically remove the target from `from` and insert it into `to`
    fn move_to_tier(
        &self,
        target_id: &str,
        from: Tier,
        to: Tier,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry>;

    /// Re-queue at the same tier with one more consecutive failure
    fn retry_in_place(&self, target_id: &str, tier: Tier, attempt_id: &str)
        -> StoreResult<QueueEntry>;

    /// Set a terminal flag and drop the target from every tier queue
    fn finish(
        &self,
        target_id: &str,
        tier: Tier,
        flag: TerminalFlag,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry>;

    fn entry(&self, target_id: &str) -> StoreResult<Option<QueueEntry>>;

    fn entries(&self) -> StoreResult<Vec<QueueEntry>>;

    /// Clear every claim left behind by an interrupted run
    fn release_claims(&self) -> StoreResult<usize>;
}

/// Shared transition checks used by every backend
pub(crate) fn expect_pending_at(
    entry: Option<&QueueEntry>,
    target_id: &str,
    tier: Tier,
) -> StoreResult<()> {
    let entry = entry.ok_or_else(|| StoreError::invariant(target_id, "no queue entry"))?;
    if !entry.is_pending() {
        return Err(StoreError::invariant(
            target_id,
            format!("entry is terminal ({})", entry.flag),
        ));
    }
    if entry.tier != tier {
        return Err(StoreError::invariant(
            target_id,
            format!("entry is at {}, caller expected {tier}", entry.tier),
        ));
    }
    Ok(())
}
