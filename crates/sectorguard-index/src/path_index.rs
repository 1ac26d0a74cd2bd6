//! Path-based storage index
//!
//! Looks a sector up in each configured storage path
//! (`<path>/<kind>/s-t0<miner>-<number>`), store paths first, then in the
//! remote store if one is attached. Locks live in an in-process
//! `LockTable`.

use crate::error::IndexError;
use crate::index::{Placement, SectorIndex};
use crate::lock::LockTable;
use async_trait::async_trait;
use sectorguard_common::config::StoragePathConfig;
use sectorguard_common::{FileKind, FileKinds, SectorId, StorageLocation};
use sectorguard_s3::RemoteBackend;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub struct PathIndex {
    paths: Vec<StoragePathConfig>,
    remote: Option<Arc<RemoteBackend>>,
    locks: LockTable,
}

impl PathIndex {
    #[must_use]
    pub fn new(paths: Vec<StoragePathConfig>) -> Self {
        Self {
            paths,
            remote: None,
            locks: LockTable::new(),
        }
    }

    /// Fall back to this remote store for sectors not found locally
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<RemoteBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn paths(&self) -> &[StoragePathConfig] {
        &self.paths
    }

    /// Long-term storage path with the highest weight
    fn store_target(&self) -> Option<&StoragePathConfig> {
        self.paths
            .iter()
            .filter(|p| p.can_store)
            .max_by_key(|p| p.weight)
    }

    /// Store paths first, then seal-only scratch paths; paths that neither
    /// seal nor store are never searched
    fn search_order(&self) -> impl Iterator<Item = &StoragePathConfig> {
        self.paths
            .iter()
            .filter(|p| p.can_store)
            .chain(self.paths.iter().filter(|p| p.can_seal && !p.can_store))
    }

    async fn find_local(&self, kind: FileKind, name: &str) -> Result<Option<Placement>, IndexError> {
        for path in self.search_order() {
            let candidate = path.path.join(kind.token()).join(name);
            let exists = tokio::fs::try_exists(&candidate)
                .await
                .map_err(|source| IndexError::Io {
                    path: candidate.clone(),
                    source,
                })?;
            if !exists {
                continue;
            }

            let relocate_to = if path.can_store {
                None
            } else {
                self.store_target()
                    .map(|target| target.path.join(kind.token()).join(name))
            };
            trace!(path = %candidate.display(), kind = %kind, "found locally");
            return Ok(Some(Placement {
                location: StorageLocation::Local { path: candidate },
                relocate_to,
            }));
        }
        Ok(None)
    }

    async fn find_remote(&self, kind: FileKind, name: &str) -> Result<Option<Placement>, IndexError> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        if remote.has_sector(kind, name).await? {
            trace!(sector = name, kind = %kind, "found in remote store");
            return Ok(Some(Placement::new(StorageLocation::Remote(
                remote.location(kind, name),
            ))));
        }
        Ok(None)
    }
}

#[async_trait]
impl SectorIndex for PathIndex {
    async fn try_lock_read(
        &self,
        sector: SectorId,
        kinds: FileKinds,
        scope: CancellationToken,
    ) -> Result<bool, IndexError> {
        if !self.locks.try_read(sector, kinds, &scope) {
            debug!(sector = %sector, kinds = %kinds, "read lock busy");
            return Ok(false);
        }
        trace!(sector = %sector, kinds = %kinds, "read lock taken");
        Ok(true)
    }

    async fn try_lock_write(
        &self,
        sector: SectorId,
        kinds: FileKinds,
        scope: CancellationToken,
    ) -> Result<bool, IndexError> {
        if !self.locks.try_write(sector, kinds, &scope) {
            debug!(sector = %sector, kinds = %kinds, "write lock busy");
            return Ok(false);
        }
        trace!(sector = %sector, kinds = %kinds, "write lock taken");
        Ok(true)
    }

    async fn resolve_location(
        &self,
        sector: SectorId,
        kinds: FileKinds,
    ) -> Result<BTreeMap<FileKind, Placement>, IndexError> {
        let name = sector.file_name();
        let mut placements = BTreeMap::new();
        let mut missing = FileKinds::NONE;

        for kind in kinds.iter() {
            let found = match self.find_local(kind, &name).await? {
                Some(placement) => Some(placement),
                None => self.find_remote(kind, &name).await?,
            };
            match found {
                Some(placement) => {
                    placements.insert(kind, placement);
                }
                None => missing.insert(kind),
            }
        }

        if missing.is_empty() {
            Ok(placements)
        } else {
            Err(IndexError::NotFound {
                sector,
                kinds: missing,
            })
        }
    }
}

/// Local path of one kind of a sector under a storage root
#[must_use]
pub fn sector_path(root: &std::path::Path, kind: FileKind, sector: SectorId) -> PathBuf {
    root.join(kind.token()).join(sector.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectorguard_common::RemoteStoreInfo;
    use sectorguard_s3::MemoryObjectApi;

    const S1: SectorId = SectorId::new(1000, 1);

    fn store_path(root: &std::path::Path, can_seal: bool, can_store: bool, weight: u64) -> StoragePathConfig {
        StoragePathConfig {
            path: root.to_path_buf(),
            can_seal,
            can_store,
            weight,
        }
    }

    #[tokio::test]
    async fn test_lock_released_on_cancel() {
        let index = PathIndex::new(Vec::new());
        let scope = CancellationToken::new();
        assert!(index.try_lock_read(S1, FileKinds::SEALED_CACHE, scope.clone()).await.unwrap());
        assert!(
            !index
                .try_lock_write(S1, FileKind::Sealed.into(), CancellationToken::new())
                .await
                .unwrap()
        );

        scope.cancel();
        assert_eq!(index.locks().held(), 0);

        let writer = CancellationToken::new();
        assert!(index.try_lock_write(S1, FileKind::Sealed.into(), writer.clone()).await.unwrap());
        assert!(!index.try_lock_read(S1, FileKinds::SEALED_CACHE, CancellationToken::new()).await.unwrap());
        writer.cancel();
        assert_eq!(index.locks().held(), 0);
    }

    #[tokio::test]
    async fn test_resolve_prefers_store_and_marks_relocation() {
        let seal = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();

        // Sealed file only in scratch space, cache in both
        let sealed = sector_path(seal.path(), FileKind::Sealed, S1);
        tokio::fs::create_dir_all(sealed.parent().unwrap()).await.unwrap();
        tokio::fs::write(&sealed, b"x").await.unwrap();
        for root in [seal.path(), store.path()] {
            tokio::fs::create_dir_all(sector_path(root, FileKind::Cache, S1)).await.unwrap();
        }

        let index = PathIndex::new(vec![
            store_path(seal.path(), true, false, 10),
            store_path(store.path(), false, true, 10),
        ]);
        let placements = index.resolve_location(S1, FileKinds::SEALED_CACHE).await.unwrap();

        let sealed_placement = &placements[&FileKind::Sealed];
        assert_eq!(sealed_placement.location.local_path(), Some(sealed.as_path()));
        assert_eq!(
            sealed_placement.relocate_to,
            Some(sector_path(store.path(), FileKind::Sealed, S1))
        );

        let cache_placement = &placements[&FileKind::Cache];
        assert_eq!(
            cache_placement.location.local_path(),
            Some(sector_path(store.path(), FileKind::Cache, S1).as_path())
        );
        assert!(cache_placement.relocate_to.is_none());
    }

    #[tokio::test]
    async fn test_inactive_path_not_searched() {
        let dir = tempfile::tempdir().unwrap();
        for kind in [FileKind::Sealed, FileKind::Cache] {
            let path = sector_path(dir.path(), kind, S1);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&path, b"x").await.unwrap();
        }

        let index = PathIndex::new(vec![store_path(dir.path(), false, false, 10)]);
        let err = index
            .resolve_location(S1, FileKinds::SEALED_CACHE)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let index = PathIndex::new(vec![store_path(dir.path(), true, false, 10)]);
        let placements = index.resolve_location(S1, FileKinds::SEALED_CACHE).await.unwrap();
        assert_eq!(placements.len(), 2);
        // No store path to relocate to
        assert!(placements.values().all(|p| p.relocate_to.is_none()));
    }

    #[tokio::test]
    async fn test_resolve_remote_fallback_and_not_found() {
        let info = RemoteStoreInfo {
            endpoint: "mem".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            bucket: "lotus".into(),
            namespace: "ns".into(),
            region: "us-west-2".into(),
            use_tls: false,
        };
        let api = Arc::new(MemoryObjectApi::with_buckets(["lotus-ns-proof", "lotus-ns-data"]));
        api.insert_object("lotus-ns-data", "sealed/s-t01000-1", 8);
        let remote = Arc::new(RemoteBackend::connect(info, api.clone(), 1000).await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        let index = PathIndex::new(vec![store_path(dir.path(), false, true, 10)]).with_remote(remote);

        let err = index
            .resolve_location(S1, FileKinds::SEALED_CACHE)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::NotFound { kinds, .. } if kinds == FileKinds::from(FileKind::Cache)));

        api.insert_object("lotus-ns-proof", "cache/s-t01000-1/t_aux", 1);
        let placements = index.resolve_location(S1, FileKinds::SEALED_CACHE).await.unwrap();
        assert!(placements.values().all(|p| p.location.is_remote()));
    }
}
