//! Tiered Enrichment Coordination Library
//!
//! This library provides the state machine that walks each target (a
//! school district) through an ordered ladder of extraction strategies
//! until its bell schedule is found, a human has to look, or the source
//! turns out to block automated access.
//!
//! # Components
//!
//! - `classifier`: raw outcome → one of six categories, deterministic
//! - `escalation`: total decision function over category × tier
//! - `store`: attempt ledger + target queue (in-memory or RocksDB)
//! - `batch`: groups costly-tier work by platform or state
//! - `processor`: tier processor and sink seams
//! - `orchestrator`: the dequeue → process → classify → record → route loop
//! - `events`: broadcast view of every transition
//!
//! # Tier ladder
//!
//! | Tier | Strategy   | Unit   | Cost     |
//! |------|------------|--------|----------|
//! | 1    | probe      | target | free     |
//! | 2    | rendered   | target | free     |
//! | 3    | document   | target | free     |
//! | 4    | extraction | batch  | external |
//! | 5    | search     | batch  | external |

pub mod batch;
pub mod classifier;
pub mod escalation;
pub mod events;
pub mod orchestrator;
pub mod processor;
pub mod store;
pub mod types;

// Re-export core types
pub use types::{
    Attempt, AttemptSummary, BatchId, BellSchedule, Category, Diagnostics, ExtractedResult,
    GradeSchedule, QueueEntry, Target, TargetId, TerminalFlag, Tier,
};

// Re-export pipeline stages
pub use batch::{Batch, BatchComposer, BatchConfig};
pub use classifier::{is_challenge_page, Classification, Classifier, ClassifierConfig};
pub use escalation::{Action, Decision, EscalationPolicy, EscalationReason, Observation, PolicyConfig};

// Re-export seams
pub use processor::{
    BatchProcessor, ProcessorSet, RawOutcome, ResultSink, ReviewSink, SinkError, TierProcessor,
};

// Re-export state
pub use store::{CampaignStore, MemoryStore, SharedStore, StoreError, StoreResult};
#[cfg(feature = "heavy-state")]
pub use store::RocksStore;

// Re-export orchestration
pub use events::{EnrichmentEvent, EventBus, EventFilter, SharedEventBus};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorResult, ResumeReport,
    RunReport, StatusReport, StepReport, TierBudgets, TierCounts,
};
