use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown plan: {0}")]
    UnknownPlan(String),
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("invalid limit {0}: use -1 for unlimited or a non-negative quota")]
    InvalidLimit(i64),
    #[error("plan policy table defines no plans")]
    NoPlans,
    #[error("invalid name in plan policy table: {0:?}")]
    InvalidName(String),
    #[error("failed to read plan policy {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse plan policy: {0}")]
    Parse(#[from] serde_json::Error),
}
