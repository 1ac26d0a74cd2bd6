//! Storage index errors

use sectorguard_common::{Error, FileKinds, SectorId};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// The index itself cannot be reached or queried
    #[error("storage index unavailable: {0}")]
    Unavailable(String),

    #[error("sector {sector} ({kinds}) not found in any storage path")]
    NotFound { sector: SectorId, kinds: FileKinds },

    #[error("looking up {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote lookup failed: {0}")]
    Remote(String),
}

impl IndexError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<Error> for IndexError {
    fn from(err: Error) -> Self {
        Self::Remote(err.to_string())
    }
}

impl From<IndexError> for Error {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound { sector, kinds } => Self::SectorNotFound { sector, kinds },
            other => Self::Index(other.to_string()),
        }
    }
}
