//! S3 client error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the S3 wire client
#[derive(Debug, Error)]
pub enum S3Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} returned status {status}: {code}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        code: String,
        message: String,
    },

    #[error("malformed XML response: {0}")]
    Xml(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out waiting for {0} to exist")]
    WaiterTimeout(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    #[error("malformed key {key} in bucket {bucket}")]
    MalformedKey { bucket: String, key: String },
}

impl S3Error {
    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            Self::WaiterTimeout(_) => true,
            _ => false,
        }
    }
}

impl From<S3Error> for sectorguard_common::Error {
    fn from(err: S3Error) -> Self {
        Self::Remote(err.to_string())
    }
}
