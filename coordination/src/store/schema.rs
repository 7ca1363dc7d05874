//! Column family definitions for the RocksDB campaign store

/// Column family for imported targets
pub const CF_TARGETS: &str = "targets";

/// Column family for the append-only attempt ledger
pub const CF_ATTEMPTS: &str = "attempts";

/// Column family for queue entries (one record per target)
pub const CF_QUEUE: &str = "queue";

/// Column family indexing pending entries by tier, then enqueue time
pub const CF_PENDING: &str = "pending";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_TARGETS, CF_ATTEMPTS, CF_QUEUE, CF_PENDING];

/// Key prefixes for compound keys
pub mod keys {
    use chrono::{DateTime, Utc};

    use crate::types::Tier;

    pub const TARGET_PREFIX: &str = "tgt:";
    pub const QUEUE_PREFIX: &str = "q:";

    pub fn target(target_id: &str) -> String {
        format!("{TARGET_PREFIX}{target_id}")
    }

    /// Prefix covering every attempt for one target
    pub fn attempt_prefix(target_id: &str) -> String {
        format!("att:{target_id}:")
    }

    /// Attempt key; the zero-padded sequence keeps prefix scans in record order
    pub fn attempt(target_id: &str, seq: u64) -> String {
        format!("att:{target_id}:{seq:020}")
    }

    pub fn queue(target_id: &str) -> String {
        format!("{QUEUE_PREFIX}{target_id}")
    }

    /// Prefix covering every pending entry at one tier
    pub fn pending_prefix(tier: Tier) -> String {
        format!("pnd:{}:", tier.number())
    }

    /// Pending index key; sorts FIFO by enqueue time, then by id
    pub fn pending(tier: Tier, enqueued_at: DateTime<Utc>, target_id: &str) -> String {
        format!(
            "{}{:020}:{target_id}",
            pending_prefix(tier),
            enqueued_at.timestamp_micros().max(0)
        )
    }

    /// Target id from a pending index key; ids may themselves contain ':'
    pub fn parse_pending_id(key: &str) -> Option<&str> {
        key.splitn(4, ':').nth(3)
    }

    /// Parse the sequence number from an attempt key
    pub fn parse_attempt_seq(key: &str) -> Option<u64> {
        key.rsplit(':').next()?.parse().ok()
    }
}
