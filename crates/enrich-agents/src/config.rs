use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use coordination::OrchestratorConfig;

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// A collaborator service URL plus its request timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl EndpointConfig {
    fn local(port: u16) -> Self {
        Self {
            url: format!("http://localhost:{port}"),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// External collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Rendering/fetch service (tiers 1–2)
    pub fetch: EndpointConfig,
    /// PDF/OCR text service (tier 3)
    pub document: EndpointConfig,
    /// Batch extraction service (tier 4)
    pub extraction: EndpointConfig,
    /// Batch search service (tier 5)
    pub search: EndpointConfig,
    /// Bearer token sent to every collaborator
    pub api_key: Option<String>,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            fetch: EndpointConfig::local(3000),
            document: EndpointConfig::local(8081),
            extraction: EndpointConfig::local(8082),
            search: EndpointConfig::local(8083),
            api_key: None,
        }
    }
}

/// Tier 1–3 crawl limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Candidate pages probed per target at tier 1
    pub max_probe_pages: usize,
    /// Known URLs rendered per target at tier 2
    pub max_rendered_pages: usize,
    /// Linked documents read per target at tier 3
    pub max_documents: usize,
    /// Per-page fetch timeout; must fit inside the tier budget
    pub page_timeout_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_probe_pages: 8,
            max_rendered_pages: 6,
            max_documents: 5,
            page_timeout_secs: 10,
        }
    }
}

impl CrawlConfig {
    pub fn page_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.page_timeout_secs)
    }
}

/// Where campaign state and terminal artifacts are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// RocksDB directory (used with the `heavy-state` feature)
    pub state_path: PathBuf,
    /// Accepted results, one JSON object per line
    pub results_path: PathBuf,
    /// Manual-review and blocked targets, one JSON object per line
    pub review_path: PathBuf,
    /// Append-only run telemetry
    pub telemetry_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(".enrich-state"),
            results_path: PathBuf::from("out/results.jsonl"),
            review_path: PathBuf::from("out/manual_review.jsonl"),
            telemetry_path: PathBuf::from(".enrich-telemetry.jsonl"),
        }
    }
}

/// Top-level configuration.
///
/// Layered: defaults, then the TOML file, then `ENRICH_*` environment
/// variables. CLI flags are applied last by the binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub collaborators: CollaboratorConfig,
    pub crawl: CrawlConfig,
    pub orchestrator: OrchestratorConfig,
    pub output: OutputConfig,
}

impl EnrichConfig {
    /// Defaults, the optional file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `ENRICH_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let collab = &mut self.collaborators;
        if let Some(url) = lookup("ENRICH_FETCH_URL") {
            collab.fetch.url = url;
        }
        if let Some(url) = lookup("ENRICH_DOCUMENT_URL") {
            collab.document.url = url;
        }
        if let Some(url) = lookup("ENRICH_EXTRACT_URL") {
            collab.extraction.url = url;
        }
        if let Some(url) = lookup("ENRICH_SEARCH_URL") {
            collab.search.url = url;
        }
        if let Some(key) = lookup("ENRICH_API_KEY") {
            collab.api_key = Some(key);
        }
        if let Some(path) = lookup("ENRICH_STATE_PATH") {
            self.output.state_path = PathBuf::from(path);
        }

        let orch = &mut self.orchestrator;
        if let Some(n) = parse_env(&lookup, "ENRICH_CONCURRENCY")? {
            orch.concurrency = n;
        }
        if let Some(n) = parse_env(&lookup, "ENRICH_BATCH_SIZE")? {
            orch.batch.batch_size = n;
        }
        if let Some(threshold) = parse_env::<f64, _>(&lookup, "ENRICH_CONFIDENCE_THRESHOLD")? {
            self.set_confidence_threshold(threshold);
        }
        Ok(())
    }

    /// The acceptance threshold drives both the classifier and the policy
    pub fn set_confidence_threshold(&mut self, threshold: f64) {
        self.orchestrator.policy.confidence_threshold = threshold;
        self.orchestrator.classifier.confidence_floor = threshold;
    }
}

fn parse_env<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
    }
}
