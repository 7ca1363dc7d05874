//! Escalation Policy: Deterministic State Machine for Tier Routing
//!
//! Decides, for every classified attempt, whether a target retries its
//! current tier, advances to the next one, or stops. Pure function of the
//! queue entry, the observation and configuration: no wall-clock, no
//! randomness, so the whole decision table can be tested exhaustively.
//!
//! # Escalation Ladder
//!
//! ```text
//! tier1 probe ─► tier2 rendered ─► tier3 document ─► tier4 extraction ─► tier5 search
//!     │                                               (batched)            (batched)
//!     ├─ success ≥ threshold        → stop_success
//!     ├─ security_block             → stop_blocked (one attempt, no retry, no escalation)
//!     ├─ not_found total ≥ limit    → stop_manual_review
//!     ├─ timeout / transient / 404  → retry same tier (up to retry cap), then advance
//!     ├─ weak success / low conf.   → advance
//!     │
//!     ▼
//! advancing past the final tier    → stop_manual_review
//! ```

pub mod decision;
pub mod engine;

pub use decision::{Action, Decision, EscalationReason};
pub use engine::{EscalationPolicy, Observation, PolicyConfig};
