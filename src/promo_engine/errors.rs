//! Error types shared by the promotion pipeline

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Transient failure while turning a source page into candidates.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("source {url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("source {0} returned an empty page")]
    EmptyPage(String),
    #[error("invalid source url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("extraction failed: {0}")]
    Other(String),
}

/// Raised by [`crate::promo_engine::retry::RetryPolicy`] once every attempt failed.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E: fmt::Display + fmt::Debug> {
    pub operation: String,
    pub attempts: u32,
    pub last_error: E,
}

/// I/O or encoding failure on the history or rotation files.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Invalid or missing runtime configuration. Only fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
