//! Logging setup and per-run telemetry
//!
//! `init_tracing` installs the fmt subscriber. Every `run` appends one
//! [`RunTelemetry`] line to the telemetry file for later analysis.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use coordination::{RunReport, StatusReport, TierCounts, Tier};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,enrich_agents=debug,coordination=info";

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .init();
}

/// Summary of one `run` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTelemetry {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Targets routed during this run, per tier
    pub processed: BTreeMap<Tier, usize>,
    pub cancelled: bool,
    pub released_claims: usize,
    pub reconciled: usize,
    /// Campaign-wide counts after the run
    pub totals: TierCounts,
    pub attempts: u64,
    pub sink_failures: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunTelemetry {
    pub fn new(
        started_at: DateTime<Utc>,
        report: &RunReport,
        reconciled: usize,
        status: &StatusReport,
    ) -> Self {
        let ended_at = Utc::now();
        Self {
            run_id: format!("run-{}", started_at.format("%Y%m%dT%H%M%S%.3fZ")),
            started_at,
            ended_at,
            elapsed_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
            processed: report.processed.clone(),
            cancelled: report.cancelled,
            released_claims: report.released_claims,
            reconciled,
            totals: status.totals,
            attempts: status.attempts,
            sink_failures: status.sink_failures,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn total_processed(&self) -> usize {
        self.processed.values().sum()
    }
}

/// Append one run summary as a JSON line.
///
/// Telemetry is best-effort; failures are logged and swallowed.
pub fn append_telemetry(telemetry: &RunTelemetry, path: &Path) {
    let json = match serde_json::to_string(telemetry) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize run telemetry: {e}");
            return;
        }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create telemetry directory: {e}");
            return;
        }
    }

    use std::io::Write;
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{json}") {
                warn!("Failed to append telemetry: {e}");
            } else {
                info!(path = %path.display(), run_id = %telemetry.run_id, "Appended run telemetry");
            }
        }
        Err(e) => warn!("Failed to open telemetry file: {e}"),
    }
}
