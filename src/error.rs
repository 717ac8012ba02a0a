use std::io;

use thiserror::Error;

/// Error type for fetch, persistence and configuration failures.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("blocked at {url} with status {status}")]
    Blocked { url: String, status: u16 },
    #[error("listing viewport failure: {0}")]
    Viewport(String),
    #[error("master listing yielded no programs through any discovery tier")]
    NoPrograms,
    #[error("harvest interrupted by operator")]
    Interrupted,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Regex(#[from] regex::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
