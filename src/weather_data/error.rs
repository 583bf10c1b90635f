use crate::config::ConfigError;
use crate::weather_data::table_parser::{Column, SectionKind};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failure talking to the upstream status page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read response body from {0}")]
    Body(String, #[source] reqwest::Error),

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
}

/// The document as a whole could not be turned into sections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Upstream returned an empty document")]
    EmptyDocument,

    #[error("No recognizable weather sections in document ({bytes} bytes)")]
    NoSections { bytes: usize },
}

/// Everything that can make one refresh cycle fail.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Transport(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Refresh task failed to complete: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for RefreshError {
    fn from(e: tokio::task::JoinError) -> Self {
        RefreshError::TaskJoin(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialParseKind {
    BadTimestamp,
    Placeholder,
    NotNumeric,
    MissingCell,
}

impl fmt::Display for PartialParseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartialParseKind::BadTimestamp => "unparseable date label",
            PartialParseKind::Placeholder => "placeholder instead of a value",
            PartialParseKind::NotNumeric => "non-numeric value",
            PartialParseKind::MissingCell => "missing cell",
        };
        f.write_str(s)
    }
}

/// A single row-level problem. Recorded on the snapshot, never returned as a failure.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[error("{section} row {row}: {kind} in {field} ('{raw}')")]
pub struct PartialParseError {
    pub section: SectionKind,
    pub row: usize,
    pub field: Column,
    pub raw: String,
    pub kind: PartialParseKind,
}
