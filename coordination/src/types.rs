//! Core types for tiered enrichment
//!
//! These types are persisted by the campaign store and represent the
//! durable state of an enrichment campaign: the targets themselves, the
//! routing entry that places each target in a tier queue, and the
//! immutable attempt records that make up the ledger.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier for a target (district)
pub type TargetId = String;

/// Identifier for a transient batch at a costly tier
pub type BatchId = String;

/// One organizational unit needing enrichment.
///
/// Targets are created at import and only ever grow by appending
/// discovered sub-site URLs. Terminal status lives on the queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Stable identifier (unique within a campaign)
    pub id: TargetId,
    /// Display name
    pub name: String,
    /// Geographic tag (two-letter state code)
    pub state: String,
    /// Known homepage, if the catalog had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Sub-site URLs discovered by the probe tier
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovered_urls: Vec<String>,
}

impl Target {
    /// Create a target without a homepage
    pub fn new(id: impl Into<String>, name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: state.into(),
            homepage: None,
            discovered_urls: Vec::new(),
        }
    }

    /// Attach a homepage URL
    pub fn with_homepage(mut self, url: impl Into<String>) -> Self {
        self.homepage = Some(url.into());
        self
    }

    /// Append discovered URLs, skipping ones already known.
    ///
    /// Returns how many URLs were actually added.
    pub fn append_discovered<I>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for url in urls {
            let url = url.trim().to_string();
            if url.is_empty() || self.knows(&url) {
                continue;
            }
            self.discovered_urls.push(url);
            added += 1;
        }
        added
    }

    /// Homepage first, then discovered URLs in discovery order
    pub fn known_urls(&self) -> Vec<&str> {
        self.homepage
            .iter()
            .map(String::as_str)
            .chain(self.discovered_urls.iter().map(String::as_str))
            .collect()
    }

    fn knows(&self, url: &str) -> bool {
        self.homepage.as_deref() == Some(url) || self.discovered_urls.iter().any(|u| u == url)
    }
}

/// Strategies in escalation order, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Fetch homepage and probe common schedule paths
    Probe,
    /// Parse rendered DOM text for time patterns
    Rendered,
    /// Extract text from linked documents (native, then OCR)
    Document,
    /// Costly batched extraction call
    Extraction,
    /// Costly batched search call
    Search,
}

impl Tier {
    /// Every tier in escalation order
    pub const ALL: [Tier; 5] = [
        Tier::Probe,
        Tier::Rendered,
        Tier::Document,
        Tier::Extraction,
        Tier::Search,
    ];

    /// 1-based tier number
    pub fn number(self) -> u8 {
        match self {
            Self::Probe => 1,
            Self::Rendered => 2,
            Self::Document => 3,
            Self::Extraction => 4,
            Self::Search => 5,
        }
    }

    /// Look up a tier by its 1-based number
    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    /// The next, more expensive tier
    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    /// Tiers that incur external cost and only run on batches
    pub fn is_batched(self) -> bool {
        matches!(self, Self::Extraction | Self::Search)
    }

    /// Default wall-clock budget for one unit of work at this tier
    pub fn default_budget(self) -> Duration {
        match self {
            Self::Probe => Duration::from_secs(30),
            Self::Rendered => Duration::from_secs(45),
            Self::Document => Duration::from_secs(60),
            Self::Extraction | Self::Search => Duration::from_secs(300),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Probe => "probe",
            Self::Rendered => "rendered",
            Self::Document => "document",
            Self::Extraction => "extraction",
            Self::Search => "search",
        };
        write!(f, "tier{}_{}", self.number(), name)
    }
}

/// Outcome category produced by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Success,
    NotFound,
    Timeout,
    SecurityBlock,
    LowConfidence,
    TransientError,
}

impl Category {
    /// Every category, for exhaustive tables
    pub const ALL: [Category; 6] = [
        Category::Success,
        Category::NotFound,
        Category::Timeout,
        Category::SecurityBlock,
        Category::LowConfidence,
        Category::TransientError,
    ];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::NotFound => write!(f, "not_found"),
            Self::Timeout => write!(f, "timeout"),
            Self::SecurityBlock => write!(f, "security_block"),
            Self::LowConfidence => write!(f, "low_confidence"),
            Self::TransientError => write!(f, "transient_error"),
        }
    }
}

/// Routing status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalFlag {
    Pending,
    Succeeded,
    ManualReview,
    Blocked,
}

impl TerminalFlag {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TerminalFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::ManualReview => write!(f, "manual_review"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Mutable routing state for one target.
///
/// Exactly one entry exists per target; it is replaced on every transition.
/// A terminal entry keeps the tier it finished at but sits in no tier queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub target_id: TargetId,
    /// Current tier (or the tier the target finished at, once terminal)
    pub tier: Tier,
    /// When the target entered the current tier queue
    pub enqueued_at: DateTime<Utc>,
    /// Failures at the current tier since it was entered
    pub consecutive_failures: u32,
    pub flag: TerminalFlag,
    /// Handed out by `dequeue_ready` and not yet routed
    #[serde(default)]
    pub claimed: bool,
    /// Ledger attempt whose decision produced this entry
    #[serde(default)]
    pub last_attempt_id: Option<String>,
}

impl QueueEntry {
    /// Fresh pending entry at `tier`
    pub fn new(target_id: impl Into<String>, tier: Tier) -> Self {
        Self {
            target_id: target_id.into(),
            tier,
            enqueued_at: Utc::now(),
            consecutive_failures: 0,
            flag: TerminalFlag::Pending,
            claimed: false,
            last_attempt_id: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.flag == TerminalFlag::Pending
    }
}

/// Raw diagnostic payload kept with every attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub status: Option<u16>,
    pub error: Option<String>,
    pub confidence: Option<f64>,
    pub url: Option<String>,
}

/// One execution of one tier against one target. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub target_id: TargetId,
    pub tier: Tier,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub category: Category,
    pub diagnostics: Diagnostics,
    /// Set only for attempts made inside a batch (tiers 4–5)
    pub batch_id: Option<BatchId>,
    /// Extracted payload, kept so an unapplied success can be replayed
    #[serde(default)]
    pub result: Option<ExtractedResult>,
}

/// Schedule for one grade band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSchedule {
    /// e.g. "elementary", "6-8", "high"
    pub grade_band: String,
    /// "HH:MM" 24-hour
    pub start_time: String,
    /// "HH:MM" 24-hour
    pub end_time: String,
    pub instructional_minutes: Option<u32>,
}

/// The structured fact being extracted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BellSchedule {
    pub grades: Vec<GradeSchedule>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Terminal artifact emitted once on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedResult {
    pub schedule: BellSchedule,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Tier that produced the result
    pub tier: Tier,
    pub source_urls: Vec<String>,
}

/// Compact view of a target's ledger, handed to the manual-review sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub total_attempts: usize,
    pub by_category: BTreeMap<Category, u32>,
    pub tiers_tried: Vec<Tier>,
    pub last_error: Option<String>,
    pub last_status: Option<u16>,
}

impl AttemptSummary {
    pub fn from_history(history: &[Attempt]) -> Self {
        let mut summary = Self {
            total_attempts: history.len(),
            ..Default::default()
        };
        for attempt in history {
            *summary.by_category.entry(attempt.category).or_insert(0) += 1;
            if !summary.tiers_tried.contains(&attempt.tier) {
                summary.tiers_tried.push(attempt.tier);
            }
            if attempt.diagnostics.error.is_some() {
                summary.last_error = attempt.diagnostics.error.clone();
            }
            if attempt.diagnostics.status.is_some() {
                summary.last_status = attempt.diagnostics.status;
            }
        }
        summary
    }
}
