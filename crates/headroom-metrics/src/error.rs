//! Metric query error types.

use std::time::Duration;

use thiserror::Error;

/// A single query against the metrics backend failed.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid metrics url: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("query failed ({error_type}): {error}")]
    Backend { error_type: String, error: String },
}

/// A rule could not be sampled; the whole poll iteration is skipped.
#[derive(Debug, Error)]
#[error("sampling {label:?} failed: {source}")]
pub struct SampleError {
    pub label: String,
    #[source]
    pub source: QueryError,
}
