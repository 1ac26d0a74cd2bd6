//! SectorGuard Checker - Sector fault detection
//!
//! This crate provides:
//! - The `ProvingEngine` and `CommitmentGetter` contracts used by deep checks
//! - `FaultChecker`, whose `check_provable` reports which sectors of a batch
//!   are currently unprovable

pub mod checker;
pub mod engine;

pub use checker::{FaultChecker, FaultCheckerBuilder};
pub use engine::{
    Commitment, CommitmentGetter, EngineError, PoStRandomness, PrivateSectorInfo, ProvingEngine,
    SectorChallenges,
};
