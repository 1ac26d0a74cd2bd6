//! SectorGuard Common - Shared types and utilities
//!
//! This crate provides the sector identifiers, file-kind sets, proof types,
//! storage locations, error definitions and configuration shared by every
//! SectorGuard component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
