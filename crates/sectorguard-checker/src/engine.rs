//! Proving engine contracts
//!
//! The proving engine derives challenges and builds vanilla proofs from the
//! sector's files; its internals live outside this workspace.

use async_trait::async_trait;
use rand::RngCore;
use sectorguard_common::{
    ActorId, RegisteredPoStProof, SectorId, SectorNumber, SectorRef, StorageLocation,
};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Length of PoSt randomness in bytes
pub const RANDOMNESS_LENGTH: usize = 32;

/// Error reported by the proving engine or a commitment getter
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineError(String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Randomness a PoSt challenge is derived from
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PoStRandomness(pub [u8; RANDOMNESS_LENGTH]);

impl PoStRandomness {
    /// Fresh randomness, reduced to fit the proof field
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; RANDOMNESS_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[RANDOMNESS_LENGTH - 1] &= 0x3f;
        Self(bytes)
    }
}

impl fmt::Debug for PoStRandomness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoStRandomness({})", hex::encode(self.0))
    }
}

/// Sealed sector commitment (CommR)
#[derive(Clone, PartialEq, Eq)]
pub struct Commitment(pub Vec<u8>);

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", hex::encode(&self.0))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Challenged leaf indices per sector
pub type SectorChallenges = HashMap<SectorNumber, Vec<u64>>;

/// Everything the engine needs to prove one sector
#[derive(Clone, Debug)]
pub struct PrivateSectorInfo {
    pub sector: SectorRef,
    pub post_proof: RegisteredPoStProof,
    pub commitment: Commitment,
    pub sealed: StorageLocation,
    pub cache: StorageLocation,
}

/// External proving engine
#[async_trait]
pub trait ProvingEngine: Send + Sync {
    /// Fallback PoSt challenges for each of `sectors`
    async fn derive_fallback_challenges(
        &self,
        post_proof: RegisteredPoStProof,
        miner: ActorId,
        randomness: &PoStRandomness,
        sectors: &[SectorNumber],
    ) -> Result<SectorChallenges, EngineError>;

    /// A single vanilla proof over the given challenges
    async fn generate_vanilla_proof(
        &self,
        info: &PrivateSectorInfo,
        challenges: &[u64],
    ) -> Result<Vec<u8>, EngineError>;
}

/// Source of on-chain sealed commitments, supplied per batch
#[async_trait]
pub trait CommitmentGetter: Send + Sync {
    async fn get(&self, sector: SectorId) -> Result<Commitment, EngineError>;
}
