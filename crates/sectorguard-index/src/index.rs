//! Storage index contract

use crate::error::IndexError;
use async_trait::async_trait;
use sectorguard_common::{FileKind, FileKinds, SectorId, StorageLocation};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Where one kind of a sector's files lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub location: StorageLocation,
    /// Set when a local file sits in sealing scratch space and should be
    /// moved to this path in long-term storage
    pub relocate_to: Option<PathBuf>,
}

impl Placement {
    #[must_use]
    pub const fn new(location: StorageLocation) -> Self {
        Self {
            location,
            relocate_to: None,
        }
    }
}

/// Source of truth for sector placement and locking
///
/// Shared by every concurrent check and by whatever writes sectors.
#[async_trait]
pub trait SectorIndex: Send + Sync {
    /// Take a shared lock on `kinds` of the sector without waiting
    ///
    /// Returns `Ok(false)` when an exclusive holder exists. A granted lock is
    /// held until `scope` is cancelled. `Err` means the index itself failed.
    async fn try_lock_read(
        &self,
        sector: SectorId,
        kinds: FileKinds,
        scope: CancellationToken,
    ) -> Result<bool, IndexError>;

    /// Take an exclusive lock on `kinds` of the sector without waiting
    async fn try_lock_write(
        &self,
        sector: SectorId,
        kinds: FileKinds,
        scope: CancellationToken,
    ) -> Result<bool, IndexError>;

    /// Placement of each requested kind
    async fn resolve_location(
        &self,
        sector: SectorId,
        kinds: FileKinds,
    ) -> Result<BTreeMap<FileKind, Placement>, IndexError>;
}
