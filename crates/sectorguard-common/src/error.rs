//! Error types for SectorGuard
//!
//! These are request- and infrastructure-level failures. Per-sector faults
//! never surface here; they are recorded in a [`crate::FaultReport`].

use crate::types::{FileKinds, SectorId};
use thiserror::Error;

/// Common result type for SectorGuard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for SectorGuard
#[derive(Debug, Error)]
pub enum Error {
    // Request errors
    #[error("invalid proof type: {0}")]
    InvalidProofType(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Storage errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("sector {sector} ({kinds}) not found in any storage path")]
    SectorNotFound { sector: SectorId, kinds: FileKinds },

    // Infrastructure errors
    #[error("storage index error: {0}")]
    Index(String),

    #[error("bucket {0} does not exist")]
    BucketMissing(String),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Index(_) | Self::Remote(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::SectorNotFound { .. } | Self::BucketMissing(_))
    }

    /// Check if this error was caused by the request rather than the environment
    #[must_use]
    pub const fn is_request_error(&self) -> bool {
        matches!(self, Self::InvalidProofType(_) | Self::InvalidArgument(_))
    }
}
