//! Bell-schedule enrichment agents
//!
//! Concrete tier processors, collaborator HTTP clients, result sinks and
//! configuration for running a campaign with the `coordination` crate.
//!
//! - `clients`: fetch, document, extraction and search collaborators
//! - `processors`: one processor per tier, wired by [`processors::processor_set`]
//! - `schedule_text`: local time-range parsing for tiers 1–3
//! - `sinks`: JSON-lines result and manual-review files
//! - `import`: target catalog loading
//! - `config`: TOML file plus `ENRICH_*` environment overrides
//! - `telemetry`: tracing setup and per-run summaries

pub mod clients;
pub mod config;
pub mod import;
pub mod processors;
pub mod schedule_text;
pub mod sinks;
pub mod telemetry;
