//! Sector file layout
//!
//! Layout of one sector across file kinds:
//! ```text
//! sealed/s-t0<miner>-<n>                 exactly <sector size> bytes
//! unsealed/s-t0<miner>-<n>               any size
//! cache/s-t0<miner>-<n>/t_aux            any size
//! cache/s-t0<miner>-<n>/p_aux            any size
//! cache/s-t0<miner>-<n>/sc-02-data-tree-r-last.dat        (<= 512MiB)
//! cache/s-t0<miner>-<n>/sc-02-data-tree-r-last-{0..7}.dat (32GiB)
//! cache/s-t0<miner>-<n>/sc-02-data-tree-r-last-{0..15}.dat (64GiB)
//! ```

use sectorguard_common::{ExpectedSize, FileKind, FileKinds, SectorSize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Auxiliary tree metadata
pub const T_AUX: &str = "t_aux";

/// Persistent auxiliary data
pub const P_AUX: &str = "p_aux";

/// Unsharded last replica tree
pub const TREE_R_LAST: &str = "sc-02-data-tree-r-last.dat";

/// Name of shard `index` of the last replica tree
#[must_use]
pub fn tree_r_last_shard(index: usize) -> String {
    format!("sc-02-data-tree-r-last-{index}.dat")
}

/// One file a sector is expected to have
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedFile {
    pub kind: FileKind,
    /// Entry inside the kind's directory; `None` is the sector path itself
    pub entry: Option<String>,
    pub size: ExpectedSize,
}

impl ExpectedFile {
    /// Full local path given the kind's sector path
    #[must_use]
    pub fn local_path(&self, sector_path: &Path) -> PathBuf {
        match &self.entry {
            Some(entry) => sector_path.join(entry),
            None => sector_path.to_path_buf(),
        }
    }
}

/// Entries of a sector cache directory
///
/// Unknown sizes only list the aux files; the tree shards are not checked.
#[must_use]
pub fn cache_entries(size: SectorSize) -> Vec<String> {
    let mut entries = vec![T_AUX.to_string(), P_AUX.to_string()];
    match size.shard_count() {
        Some(1) => entries.push(TREE_R_LAST.to_string()),
        Some(shards) => entries.extend((0..shards).map(tree_r_last_shard)),
        None => warn!("not checking cache files of {} sectors for faults", size),
    }
    entries
}

/// Expected files of a sector of `size` for every kind in `kinds`, in kind order
#[must_use]
pub fn expected_files(size: SectorSize, kinds: FileKinds) -> Vec<ExpectedFile> {
    let mut files = Vec::new();
    for kind in kinds.iter() {
        match kind {
            FileKind::Sealed => {
                let expected = if size.is_known() {
                    ExpectedSize::Exact(size.bytes())
                } else {
                    warn!("not checking sealed file size of {} sectors", size);
                    ExpectedSize::Unconstrained
                };
                files.push(ExpectedFile {
                    kind,
                    entry: None,
                    size: expected,
                });
            }
            FileKind::Unsealed => files.push(ExpectedFile {
                kind,
                entry: None,
                size: ExpectedSize::Unconstrained,
            }),
            FileKind::Cache => files.extend(cache_entries(size).into_iter().map(|entry| {
                ExpectedFile {
                    kind,
                    entry: Some(entry),
                    size: ExpectedSize::Unconstrained,
                }
            })),
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_names(size: SectorSize) -> Vec<String> {
        expected_files(size, FileKind::Cache.into())
            .into_iter()
            .filter_map(|f| f.entry)
            .collect()
    }

    #[test]
    fn test_small_sector_layout() {
        for size in [SectorSize::KIB_2, SectorSize::MIB_8, SectorSize::MIB_512] {
            assert_eq!(cache_names(size), vec![T_AUX, P_AUX, TREE_R_LAST]);
        }
    }

    #[test]
    fn test_32gib_layout() {
        let names = cache_names(SectorSize::GIB_32);
        assert_eq!(names.len(), 2 + 8);
        for i in 0..8 {
            assert!(names.contains(&format!("sc-02-data-tree-r-last-{i}.dat")));
        }
        assert!(!names.contains(&"sc-02-data-tree-r-last-8.dat".to_string()));
        assert!(!names.contains(&TREE_R_LAST.to_string()));
    }

    #[test]
    fn test_64gib_layout() {
        let names = cache_names(SectorSize::GIB_64);
        assert_eq!(names.len(), 2 + 16);
        assert_eq!(names[2], "sc-02-data-tree-r-last-0.dat");
        assert_eq!(names[17], "sc-02-data-tree-r-last-15.dat");
    }

    #[test]
    fn test_sealed_size() {
        let files = expected_files(SectorSize::MIB_512, FileKinds::SEALED_CACHE);
        assert_eq!(files[0].kind, FileKind::Sealed);
        assert_eq!(files[0].entry, None);
        assert_eq!(files[0].size, ExpectedSize::Exact(536_870_912));
        assert!(files[1..].iter().all(|f| f.kind == FileKind::Cache));
        assert!(files[1..].iter().all(|f| f.size == ExpectedSize::Unconstrained));
    }

    #[test]
    fn test_unknown_size_degrades() {
        let size = SectorSize(1 << 40);
        let files = expected_files(size, FileKinds::SEALED_CACHE);
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].size, ExpectedSize::Unconstrained);
        assert_eq!(cache_names(size), vec![T_AUX, P_AUX]);
    }

    #[test]
    fn test_unsealed_layout() {
        let files = expected_files(SectorSize::GIB_32, FileKind::Unsealed.into());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, ExpectedSize::Unconstrained);
    }

    #[test]
    fn test_local_path() {
        let base = Path::new("/store/cache/s-t01-1");
        let file = ExpectedFile {
            kind: FileKind::Cache,
            entry: Some(T_AUX.into()),
            size: ExpectedSize::Unconstrained,
        };
        assert_eq!(file.local_path(base), PathBuf::from("/store/cache/s-t01-1/t_aux"));
    }
}
