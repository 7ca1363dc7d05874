//! Target catalog loading
//!
//! Accepts either a JSON array or one JSON object per line. Records are
//! normalized (trimmed, state upper-cased, scheme added to bare hosts)
//! and the whole file is rejected on the first bad record or repeated id.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use coordination::Target;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record {index}: {reason}")]
    Invalid { index: usize, reason: String },

    #[error("Duplicate target id: {0}")]
    DuplicateId(String),
}

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    id: String,
    name: String,
    state: String,
    #[serde(default, alias = "url", alias = "website")]
    homepage: Option<String>,
}

pub fn load_targets(path: &Path) -> Result<Vec<Target>, ImportError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_targets(&raw)
}

pub fn parse_targets(raw: &str) -> Result<Vec<Target>, ImportError> {
    let records = if raw.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<CatalogRecord>>(raw)
            .map_err(|source| ImportError::Parse { line: source.line(), source })?
    } else {
        raw.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| {
                serde_json::from_str::<CatalogRecord>(l)
                    .map_err(|source| ImportError::Parse { line: i + 1, source })
            })
            .collect::<Result<_, _>>()?
    };

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let target = normalize(index, record)?;
        if !seen.insert(target.id.clone()) {
            return Err(ImportError::DuplicateId(target.id));
        }
        targets.push(target);
    }
    Ok(targets)
}

fn normalize(index: usize, record: CatalogRecord) -> Result<Target, ImportError> {
    let id = record.id.trim();
    if id.is_empty() {
        return Err(ImportError::Invalid {
            index,
            reason: "empty id".to_string(),
        });
    }
    let state = record.state.trim().to_ascii_uppercase();
    if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ImportError::Invalid {
            index,
            reason: format!("state {:?} is not a two-letter code", record.state),
        });
    }

    let target = Target::new(id, record.name.trim(), state);
    let homepage = record
        .homepage
        .map(|h| h.trim().trim_end_matches('/').to_string())
        .filter(|h| !h.is_empty());
    Ok(match homepage {
        Some(h) if h.contains("://") => target.with_homepage(h),
        Some(h) => target.with_homepage(format!("https://{h}")),
        None => target,
    })
}
