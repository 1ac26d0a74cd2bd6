//! Local disk backend
//!
//! Provides the two local operations the fault checker needs:
//! - Existence and size checks of sector files
//! - Bulk relocation of a sector file or directory tree

use async_trait::async_trait;
use sectorguard_common::ExpectedSize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Fault found while checking a local file
#[derive(Debug, Error)]
pub enum FileFault {
    #[error("{} not found", .path.display())]
    Missing { path: PathBuf },

    #[error("{} is wrong size (got {got}, expect {want})", .path.display())]
    SizeMismatch { path: PathBuf, got: u64, want: u64 },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Relocation failure
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("move: base names must match ('{from}' != '{to}')")]
    BasenameMismatch { from: String, to: String },

    #[error("move: expanding {0}: home directory is not set")]
    HomeDir(String),

    #[error("move: creating {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("move {} -> {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("exec mv (stderr: {stderr}): {status}")]
    Command { stderr: String, status: String },
}

/// Local file operations used by the fault checker
#[async_trait]
pub trait LocalBackend: Send + Sync {
    /// Check that `path` exists and, when constrained, has the expected size
    ///
    /// Returns the observed size.
    async fn stat_expected(&self, path: &Path, expected: ExpectedSize) -> Result<u64, FileFault>;

    /// Move a file or directory tree; both paths must share a basename
    async fn move_path(&self, from: &Path, to: &Path) -> Result<(), MoveError>;
}

/// Local backend statistics
#[derive(Debug, Default)]
pub struct LocalStats {
    pub stats: AtomicU64,
    pub stat_faults: AtomicU64,
    pub moves: AtomicU64,
    pub move_errors: AtomicU64,
}

/// Local backend over the host filesystem
#[derive(Debug, Default)]
pub struct LocalFs {
    stats: LocalStats,
}

impl LocalFs {
    /// Create a new local backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get statistics
    pub const fn stats(&self) -> &LocalStats {
        &self.stats
    }

    async fn stat_inner(path: &Path, expected: ExpectedSize) -> Result<u64, FileFault> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FileFault::Missing {
                path: path.to_path_buf(),
            },
            _ => FileFault::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let got = meta.len();
        if let ExpectedSize::Exact(want) = expected
            && got != want
        {
            return Err(FileFault::SizeMismatch {
                path: path.to_path_buf(),
                got,
                want,
            });
        }
        Ok(got)
    }

    async fn move_inner(from: &Path, to: &Path) -> Result<(), MoveError> {
        let from = expand_home(from)?;
        let to = expand_home(to)?;

        if from.file_name() != to.file_name() {
            return Err(MoveError::BasenameMismatch {
                from: basename(&from),
                to: basename(&to),
            });
        }

        debug!(from = %from.display(), to = %to.display(), "move sector data");

        let to_dir = to.parent().unwrap_or_else(|| Path::new("/")).to_path_buf();
        tokio::fs::create_dir_all(&to_dir)
            .await
            .map_err(|source| MoveError::CreateDir {
                path: to_dir.clone(),
                source,
            })?;

        match tokio::fs::rename(&from, &to).await {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                // rename(2) cannot cross filesystems; mv does a single bulk move there
                info!(from = %from.display(), to = %to.display(), "cross-device move, using mv");
                let output = Command::new("/usr/bin/env")
                    .arg("mv")
                    .arg("-t")
                    .arg(&to_dir)
                    .arg(&from)
                    .output()
                    .await
                    .map_err(|source| MoveError::Rename {
                        from: from.clone(),
                        to: to.clone(),
                        source,
                    })?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(MoveError::Command {
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                        status: output.status.to_string(),
                    })
                }
            }
            Err(source) => Err(MoveError::Rename { from, to, source }),
        }
    }
}

#[async_trait]
impl LocalBackend for LocalFs {
    async fn stat_expected(&self, path: &Path, expected: ExpectedSize) -> Result<u64, FileFault> {
        self.stats.stats.fetch_add(1, Ordering::Relaxed);
        let result = Self::stat_inner(path, expected).await;
        if result.is_err() {
            self.stats.stat_faults.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn move_path(&self, from: &Path, to: &Path) -> Result<(), MoveError> {
        self.stats.moves.fetch_add(1, Ordering::Relaxed);
        let result = Self::move_inner(from, to).await;
        if result.is_err() {
            self.stats.move_errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &Path) -> Result<PathBuf, MoveError> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = std::env::var_os("HOME")
        .ok_or_else(|| MoveError::HomeDir(path.display().to_string()))?;
    Ok(PathBuf::from(home).join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_stat_expected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s-t01-1");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();

        let fs = LocalFs::new();
        assert_eq!(
            fs.stat_expected(&path, ExpectedSize::Exact(2048)).await.unwrap(),
            2048
        );
        assert_eq!(
            fs.stat_expected(&path, ExpectedSize::Unconstrained).await.unwrap(),
            2048
        );

        let err = fs
            .stat_expected(&path, ExpectedSize::Exact(4096))
            .await
            .unwrap_err();
        assert!(matches!(err, FileFault::SizeMismatch { got: 2048, want: 4096, .. }));
        assert!(err.to_string().ends_with("is wrong size (got 2048, expect 4096)"));

        let missing = dir.path().join("nope");
        let err = fs
            .stat_expected(&missing, ExpectedSize::Unconstrained)
            .await
            .unwrap_err();
        assert!(matches!(err, FileFault::Missing { .. }));
        assert!(err.to_string().ends_with("nope not found"));

        assert_eq!(fs.stats().stats.load(Ordering::Relaxed), 4);
        assert_eq!(fs.stats().stat_faults.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_move_directory() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("seal/cache/s-t01-7");
        std::fs::create_dir_all(&from).unwrap();
        std::fs::write(from.join("t_aux"), b"aux").unwrap();

        let to = dir.path().join("store/cache/s-t01-7");
        let fs = LocalFs::new();
        fs.move_path(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(to.join("t_aux")).unwrap(), b"aux");
        assert_eq!(fs.stats().moves.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_move_basename_mismatch() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("s-t01-1");
        std::fs::write(&from, b"data").unwrap();

        let fs = LocalFs::new();
        let err = fs
            .move_path(&from, &dir.path().join("other/s-t01-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, MoveError::BasenameMismatch { .. }));
        // Nothing was attempted
        assert!(from.exists());
        assert!(!dir.path().join("other").exists());
        assert_eq!(fs.stats().move_errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_expand_home() {
        let plain = Path::new("/var/lib/store");
        assert_eq!(expand_home(plain).unwrap(), plain);
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home(Path::new("~/store")).unwrap(),
                PathBuf::from(home).join("store")
            );
        }
    }
}
