//! SectorGuard Index - Placement and locking of sector files
//!
//! This crate provides:
//! - The `SectorIndex` contract consumed by the fault checker
//! - `LockCoordinator`: non-blocking, scope-released read tickets
//! - `LocationResolver`: per-kind placement with completeness enforcement
//! - `PathIndex`: an index over configured storage paths and an optional
//!   remote store, with an in-process `LockTable`

pub mod error;
pub mod index;
pub mod lock;
pub mod path_index;
pub mod resolver;

pub use error::IndexError;
pub use index::{Placement, SectorIndex};
pub use lock::{LockCoordinator, LockTable, LockTicket};
pub use path_index::{PathIndex, sector_path};
pub use resolver::LocationResolver;
