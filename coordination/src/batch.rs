//! Batch composer for the costly tiers
//!
//! Groups ready targets into bounded batches so one external call can share
//! context across similar members. Targets are stable-sorted by a
//! tier-specific grouping key and chunked into fixed-size windows; the final
//! window may be partial. Every input target lands in exactly one batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BatchId, Target, Tier};

/// Hosting platforms recognised from URL hosts, in match order
const PLATFORM_HOSTS: &[(&str, &str)] = &[
    ("finalsite", "finalsite"),
    ("schoolwires", "schoolwires"),
    ("edlio", "edlio"),
    ("thrillshare", "apptegy"),
    ("apptegy", "apptegy"),
    ("blackboard", "blackboard"),
    ("sharpschool", "sharpschool"),
    ("sites.google.com", "google_sites"),
    ("schoolinsites", "schoolinsites"),
    ("socs", "socs"),
];

/// Key used when members of one window have different keys
pub const MIXED_KEY: &str = "mixed";

/// Batch sizing and wait limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum members per batch
    pub batch_size: usize,
    /// Longest a partial batch may wait for more members
    pub max_wait_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 15,
            max_wait_secs: 120,
        }
    }
}

/// A transient group of targets consumed by one batch processor call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub tier: Tier,
    /// Shared grouping key, or [`MIXED_KEY`]
    pub key: String,
    pub members: Vec<Target>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Detect the hosting platform of a target from its known URLs
pub fn detect_platform(target: &Target) -> &'static str {
    for url in target.known_urls() {
        let lower = url.to_ascii_lowercase();
        if let Some((_, platform)) = PLATFORM_HOSTS.iter().find(|(needle, _)| lower.contains(needle))
        {
            return platform;
        }
    }
    "other"
}

/// Grouping key for a target at a costly tier
pub fn grouping_key(tier: Tier, target: &Target) -> String {
    match tier {
        Tier::Search => target.state.trim().to_ascii_uppercase(),
        _ => detect_platform(target).to_string(),
    }
}

/// Composes batches for tiers 4 and 5
#[derive(Debug, Clone, Default)]
pub struct BatchComposer {
    config: BatchConfig,
}

impl BatchComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Partition `ready` into batches of at most `batch_size` members
    pub fn compose(&self, tier: Tier, ready: Vec<Target>) -> Vec<Batch> {
        let size = self.config.batch_size.max(1);

        let mut keyed: Vec<(String, Target)> = ready
            .into_iter()
            .map(|t| (grouping_key(tier, &t), t))
            .collect();
        // sort_by is stable: FIFO order survives within a key
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut batches = Vec::with_capacity(keyed.len().div_ceil(size));
        let mut iter = keyed.into_iter().peekable();
        while iter.peek().is_some() {
            let window: Vec<(String, Target)> = iter.by_ref().take(size).collect();
            let first_key = window[0].0.clone();
            let key = if window.iter().all(|(k, _)| *k == first_key) {
                first_key
            } else {
                MIXED_KEY.to_string()
            };
            batches.push(Batch {
                id: uuid::Uuid::new_v4().to_string(),
                tier,
                key,
                members: window.into_iter().map(|(_, t)| t).collect(),
            });
        }
        batches
    }

    /// How many of a tier's `ready` entries should be dispatched now.
    ///
    /// Once the oldest ready entry has waited at least `max_wait_secs`
    /// everything goes. Before that only whole batches go; the partial
    /// tail keeps waiting for more members.
    pub fn dispatch_count(
        &self,
        ready: usize,
        oldest_enqueued_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> usize {
        let expired = oldest_enqueued_at.is_some_and(|oldest| {
            let waited = now.signed_duration_since(oldest).num_seconds();
            waited >= 0 && waited as u64 >= self.config.max_wait_secs
        });
        if expired {
            return ready;
        }
        let size = self.config.batch_size.max(1);
        (ready / size) * size
    }
}
