//! SectorGuard Storage - Sector file layout and local disks
//!
//! This crate implements:
//! - The expected file set of a sector per size class
//! - Existence/size checks against local files
//! - Bulk relocation of sector files between local paths

pub mod layout;
pub mod local;

// Re-exports
pub use layout::{ExpectedFile, P_AUX, T_AUX, TREE_R_LAST, cache_entries, expected_files};
pub use local::{FileFault, LocalBackend, LocalFs, LocalStats, MoveError};
