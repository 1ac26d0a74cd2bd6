//! Storage location resolution

use crate::error::IndexError;
use crate::index::{Placement, SectorIndex};
use sectorguard_common::{FileKind, FileKinds, SectorId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Resolves where each requested kind of a sector lives
///
/// Every requested kind must come back with exactly one placement; kinds
/// the caller did not ask for are dropped.
#[derive(Clone)]
pub struct LocationResolver {
    index: Arc<dyn SectorIndex>,
}

impl LocationResolver {
    pub fn new(index: Arc<dyn SectorIndex>) -> Self {
        Self { index }
    }

    pub async fn resolve(
        &self,
        sector: SectorId,
        kinds: FileKinds,
    ) -> Result<BTreeMap<FileKind, Placement>, IndexError> {
        let mut placements = self.index.resolve_location(sector, kinds).await?;
        placements.retain(|kind, _| kinds.contains(*kind));

        let missing: FileKinds = kinds
            .iter()
            .filter(|kind| !placements.contains_key(kind))
            .collect();
        if !missing.is_empty() {
            return Err(IndexError::NotFound {
                sector,
                kinds: missing,
            });
        }

        for (kind, placement) in &placements {
            debug!(sector = %sector, kind = %kind, location = %placement.location, "resolved");
        }
        Ok(placements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sectorguard_common::StorageLocation;
    use tokio_util::sync::CancellationToken;

    /// Index that always reports a fixed set of kinds
    struct FixedIndex(Vec<FileKind>);

    #[async_trait]
    impl SectorIndex for FixedIndex {
        async fn try_lock_read(
            &self,
            _sector: SectorId,
            _kinds: FileKinds,
            _scope: CancellationToken,
        ) -> Result<bool, IndexError> {
            Ok(true)
        }

        async fn try_lock_write(
            &self,
            _sector: SectorId,
            _kinds: FileKinds,
            _scope: CancellationToken,
        ) -> Result<bool, IndexError> {
            Ok(true)
        }

        async fn resolve_location(
            &self,
            sector: SectorId,
            _kinds: FileKinds,
        ) -> Result<BTreeMap<FileKind, Placement>, IndexError> {
            Ok(self
                .0
                .iter()
                .map(|kind| {
                    let path = format!("/store/{}/{}", kind.token(), sector.file_name());
                    (*kind, Placement::new(StorageLocation::Local { path: path.into() }))
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_missing_kind_is_not_found() {
        let resolver = LocationResolver::new(Arc::new(FixedIndex(vec![FileKind::Sealed])));
        let err = resolver
            .resolve(SectorId::new(1, 2), FileKinds::SEALED_CACHE)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "sector 1-2 (cache) not found in any storage path"
        );
    }

    #[tokio::test]
    async fn test_extra_kinds_dropped() {
        let resolver = LocationResolver::new(Arc::new(FixedIndex(FileKind::ALL.to_vec())));
        let placements = resolver
            .resolve(SectorId::new(1, 2), FileKinds::SEALED_CACHE)
            .await
            .unwrap();
        assert_eq!(
            placements.keys().copied().collect::<Vec<_>>(),
            vec![FileKind::Sealed, FileKind::Cache]
        );
    }
}
