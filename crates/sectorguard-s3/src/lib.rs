//! SectorGuard S3 - Remote object store backend
//!
//! This crate provides:
//! - A SigV4-signing S3 wire client (`S3Client`)
//! - The `ObjectApi` seam and an in-memory implementation
//! - The sector-aware `RemoteBackend` (bucket validation, listing,
//!   fan-out upload, metadata-only existence checks)
//! - `RemoteConnector`s that hand out one backend per remote store

pub mod api;
pub mod backend;
pub mod client;
pub mod connector;
pub mod error;
pub mod memory;
pub mod sigv4;
pub mod xml;

// Re-exports
pub use api::{ObjectApi, ObjectPage, ObjectSummary, Waiter};
pub use backend::{ObjectFault, RemoteBackend};
pub use client::S3Client;
pub use connector::{BackendCache, RemoteConnector, S3Connector};
pub use error::S3Error;
pub use memory::{MemoryConnector, MemoryObjectApi};
pub use sigv4::SigV4Signer;
