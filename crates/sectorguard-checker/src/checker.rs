//! Sector fault checker
//!
//! For every sector of a batch, independently:
//! 1. Take a non-blocking read lock on its sealed and cache files
//! 2. Resolve where each kind lives (and relocate out of scratch space when
//!    configured to)
//! 3. Check existence and size of every expected file, locally or in the
//!    remote store
//! 4. Optionally build a vanilla proof over fresh challenges
//!
//! A sector failing any step gets exactly one entry in the fault report and
//! the batch moves on. Index failures, remote backend construction failures
//! and cancellation abort the whole batch; partial results are discarded.

use crate::engine::{CommitmentGetter, PoStRandomness, PrivateSectorInfo, ProvingEngine};
use futures::stream::{self, StreamExt};
use sectorguard_common::config::{AcquireMode, CheckerConfig};
use sectorguard_common::{
    Error, FaultReport, FileKind, FileKinds, RegisteredPoStProof, Result, SectorId, SectorRef,
    SectorSize, StorageLocation,
};
use sectorguard_index::{LocationResolver, LockCoordinator, Placement, SectorIndex};
use sectorguard_s3::RemoteConnector;
use sectorguard_storage::{ExpectedFile, LocalBackend, expected_files};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// Kinds every proof needs
const REQUIRED_KINDS: FileKinds = FileKinds::SEALED_CACHE;

/// Outcome of one sector's check: `Some(reason)` when unprovable
type SectorOutcome = Result<Option<String>>;

pub struct FaultCheckerBuilder {
    index: Arc<dyn SectorIndex>,
    local: Arc<dyn LocalBackend>,
    remotes: Arc<dyn RemoteConnector>,
    engine: Option<Arc<dyn ProvingEngine>>,
    config: CheckerConfig,
    span: Option<Span>,
    cancel: Option<CancellationToken>,
}

impl FaultCheckerBuilder {
    /// Proving engine used for deep checks
    #[must_use]
    pub fn proving_engine(mut self, engine: Arc<dyn ProvingEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn config(mut self, config: CheckerConfig) -> Self {
        self.config = config;
        self
    }

    /// Parent span of every per-sector span (default: the current span)
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Token that aborts running batches when cancelled
    #[must_use]
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn build(self) -> FaultChecker {
        FaultChecker {
            locks: LockCoordinator::new(self.index.clone()),
            resolver: LocationResolver::new(self.index),
            local: self.local,
            remotes: self.remotes,
            engine: self.engine,
            config: self.config,
            span: self.span.unwrap_or_else(Span::current),
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}

/// Determines which sectors of a batch are currently unprovable
pub struct FaultChecker {
    locks: LockCoordinator,
    resolver: LocationResolver,
    local: Arc<dyn LocalBackend>,
    remotes: Arc<dyn RemoteConnector>,
    engine: Option<Arc<dyn ProvingEngine>>,
    config: CheckerConfig,
    span: Span,
    cancel: CancellationToken,
}

impl FaultChecker {
    pub fn builder(
        index: Arc<dyn SectorIndex>,
        local: Arc<dyn LocalBackend>,
        remotes: Arc<dyn RemoteConnector>,
    ) -> FaultCheckerBuilder {
        FaultCheckerBuilder {
            index,
            local,
            remotes,
            engine: None,
            config: CheckerConfig::default(),
            span: None,
            cancel: None,
        }
    }

    pub const fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Token that aborts running batches
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Report the unprovable sectors of a batch
    ///
    /// Deep checks run only when `getter` is given. Sectors absent from the
    /// returned report passed every check performed.
    pub async fn check_provable(
        &self,
        post_proof: RegisteredPoStProof,
        sectors: &[SectorRef],
        getter: Option<&dyn CommitmentGetter>,
    ) -> Result<FaultReport> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let deep = match (getter, &self.engine) {
            (Some(getter), Some(engine)) => Some((getter, engine.as_ref())),
            (Some(_), None) => {
                return Err(Error::configuration(
                    "deep check requested but no proving engine is configured",
                ));
            }
            (None, _) => None,
        };

        let size = post_proof.sector_size();
        if let Some(mismatched) = sectors.iter().find(|s| s.proof_type.sector_size() != size) {
            return Err(Error::invalid_argument(format!(
                "sector {} is sealed for {} sectors, batch proves {}",
                mismatched.id,
                mismatched.proof_type.sector_size(),
                size
            )));
        }
        let concurrency = self.config.max_concurrent_checks.max(1);
        info!(
            parent: &self.span,
            sectors = sectors.len(),
            sector_size = %size,
            deep = deep.is_some(),
            concurrency,
            "checking provability"
        );

        let mut checks = stream::iter(sectors.iter().copied())
            .map(|sector| async move {
                let span = info_span!(parent: &self.span, "check_sector", sector = %sector.id);
                let outcome = self
                    .check_sector(sector, size, deep)
                    .instrument(span)
                    .await;
                (sector.id, outcome)
            })
            .buffer_unordered(concurrency);

        let mut report = FaultReport::new();
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                next = checks.next() => next,
            };
            match next {
                Some((id, Ok(Some(reason)))) => report.insert(id, reason),
                Some((_, Ok(None))) => {}
                Some((id, Err(e))) => {
                    warn!(parent: &self.span, sector = %id, error = %e, "aborting provability check");
                    return Err(e);
                }
                None => break,
            }
        }

        info!(parent: &self.span, faulty = report.len(), "provability check complete");
        Ok(report)
    }

    async fn check_sector(
        &self,
        sector: SectorRef,
        size: SectorSize,
        deep: Option<(&dyn CommitmentGetter, &dyn ProvingEngine)>,
    ) -> SectorOutcome {
        let ticket = self
            .locks
            .try_acquire(sector.id, REQUIRED_KINDS, &self.cancel)
            .await
            .map_err(|e| Error::Index(format!("acquiring sector lock: {e}")))?;
        let Some(ticket) = ticket else {
            warn!("CheckProvable Sector FAULT: can't acquire read lock");
            return Ok(Some("can't acquire read lock".to_string()));
        };

        // Cancelling the ticket's scope abandons in-flight calls; only the
        // checker's own token escalates to the batch
        tokio::select! {
            biased;
            () = ticket.scope().cancelled() => {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                warn!("CheckProvable Sector FAULT: lock scope cancelled");
                Ok(Some("lock scope cancelled".to_string()))
            }
            outcome = self.verify(sector, size, deep) => outcome,
        }
    }

    async fn verify(
        &self,
        sector: SectorRef,
        size: SectorSize,
        deep: Option<(&dyn CommitmentGetter, &dyn ProvingEngine)>,
    ) -> SectorOutcome {
        let placements = match self.resolver.resolve(sector.id, REQUIRED_KINDS).await {
            Ok(placements) => placements,
            Err(e) => {
                warn!(error = %e, "CheckProvable Sector FAULT: acquire sector");
                return Ok(Some(format!("acquire sector failed: {e}")));
            }
        };

        let locations = match self.acquire(placements).await {
            Ok(locations) => locations,
            Err(reason) => return Ok(Some(reason)),
        };

        let files = expected_files(size, REQUIRED_KINDS);
        for (kind, location) in &locations {
            let kind_files: Vec<&ExpectedFile> = files.iter().filter(|f| f.kind == *kind).collect();
            let fault = match location {
                StorageLocation::Local { path } => self.check_local(path, &kind_files).await,
                StorageLocation::Remote(remote) => {
                    let backend = self.remotes.connect(&remote.info).await?;
                    let mut fault = None;
                    for file in &kind_files {
                        let name = remote.object_name(file.entry.as_deref());
                        if let Err(e) = backend
                            .check_exists(*kind, std::slice::from_ref(&name), file.size)
                            .await
                        {
                            warn!(
                                kind = %kind,
                                object = %name,
                                error = %e,
                                "CheckProvable Sector FAULT: object store check error"
                            );
                            fault = Some(format!(
                                "{} is wrong in object store ({e})",
                                remote.sector_name
                            ));
                            break;
                        }
                    }
                    fault
                }
            };
            if fault.is_some() {
                return Ok(fault);
            }
        }

        match deep {
            Some((getter, engine)) => Ok(self.deep_check(sector, &locations, getter, engine).await),
            None => Ok(None),
        }
    }

    /// Final locations, relocating out of scratch space in move mode
    async fn acquire(
        &self,
        placements: BTreeMap<FileKind, Placement>,
    ) -> std::result::Result<BTreeMap<FileKind, StorageLocation>, String> {
        let mut locations = BTreeMap::new();
        for (kind, Placement { location, relocate_to }) in placements {
            let location = match (location, relocate_to) {
                (StorageLocation::Local { path }, Some(to))
                    if self.config.acquire_mode == AcquireMode::Move =>
                {
                    if let Err(e) = self.local.move_path(&path, &to).await {
                        warn!(kind = %kind, error = %e, "CheckProvable Sector FAULT: relocating sector");
                        return Err(format!("acquire sector failed: {e}"));
                    }
                    info!(kind = %kind, from = %path.display(), to = %to.display(), "relocated sector files");
                    StorageLocation::Local { path: to }
                }
                (location, _) => location,
            };
            locations.insert(kind, location);
        }
        Ok(locations)
    }

    async fn check_local(&self, sector_path: &std::path::Path, files: &[&ExpectedFile]) -> Option<String> {
        for file in files {
            let path = file.local_path(sector_path);
            if let Err(fault) = self.local.stat_expected(&path, file.size).await {
                warn!(file = %path.display(), error = %fault, "CheckProvable Sector FAULT: sector file stat error");
                return Some(fault.to_string());
            }
        }
        None
    }

    async fn deep_check(
        &self,
        sector: SectorRef,
        locations: &BTreeMap<FileKind, StorageLocation>,
        getter: &dyn CommitmentGetter,
        engine: &dyn ProvingEngine,
    ) -> Option<String> {
        let SectorId { miner, number } = sector.id;
        let post_proof = sector.proof_type.registered_window_post_proof();
        let randomness = PoStRandomness::random();

        let challenges = match engine
            .derive_fallback_challenges(post_proof, miner, &randomness, &[number])
            .await
        {
            Ok(mut all) => all.remove(&number),
            Err(e) => {
                warn!(error = %e, "CheckProvable Sector FAULT: generating challenges");
                return Some(format!("generating fallback challenges: {e}"));
            }
        };
        let Some(challenges) = challenges else {
            warn!("CheckProvable Sector FAULT: no challenges for sector");
            return Some(format!(
                "generating fallback challenges: no challenges for sector {number}"
            ));
        };

        let commitment = match getter.get(sector.id).await {
            Ok(commitment) => commitment,
            Err(e) => {
                warn!(error = %e, "CheckProvable Sector FAULT: getting sealed commitment");
                return Some(format!("getting sealed commitment: {e}"));
            }
        };

        let (Some(sealed), Some(cache)) = (
            locations.get(&FileKind::Sealed).cloned(),
            locations.get(&FileKind::Cache).cloned(),
        ) else {
            return Some("acquire sector failed: sealed or cache location missing".to_string());
        };
        let info = PrivateSectorInfo {
            sector,
            post_proof,
            commitment,
            sealed,
            cache,
        };

        match engine.generate_vanilla_proof(&info, &challenges).await {
            Ok(proof) => {
                debug!(proof_len = proof.len(), "vanilla proof generated");
                None
            }
            Err(e) => {
                warn!(error = %e, "CheckProvable Sector FAULT: generating vanilla proof");
                Some(format!("generating vanilla proof: {e}"))
            }
        }
    }
}
