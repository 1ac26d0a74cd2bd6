//! Sector locking
//!
//! Locks are non-blocking and scoped. A caller never waits for a lock: it is
//! either granted immediately or refused. Granted locks are tied to a
//! `CancellationToken`; cancelling the token releases them.
//!
//! # Components
//!
//! - **LockTable**: in-process reader/writer state per (sector, kind)
//! - **LockCoordinator**: acquires read tickets from any `SectorIndex`
//! - **LockTicket**: RAII handle; dropping it releases the lock

use crate::error::IndexError;
use crate::index::SectorIndex;
use parking_lot::{Mutex, MutexGuard};
use sectorguard_common::{FileKind, FileKinds, SectorId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::trace;

/// Holders of one (sector, kind), each identified by its scope
#[derive(Debug, Default)]
struct LockState {
    readers: Vec<CancellationToken>,
    writer: Option<CancellationToken>,
}

impl LockState {
    /// Forget holders whose scope has ended
    fn prune(&mut self) {
        self.readers.retain(|scope| !scope.is_cancelled());
        if self.writer.as_ref().is_some_and(CancellationToken::is_cancelled) {
            self.writer = None;
        }
    }

    fn is_free(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }
}

/// Shared/exclusive lock state for every (sector, kind) pair
///
/// Acquisition over a set of kinds is all-or-nothing. A grant lasts until
/// its scope is cancelled; ended grants are dropped on the next access, so
/// a cancelled scope is observably released before any later call returns.
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<HashMap<(SectorId, FileKind), LockState>>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_pruned(&self) -> MutexGuard<'_, HashMap<(SectorId, FileKind), LockState>> {
        let mut state = self.state.lock();
        state.retain(|_, s| {
            s.prune();
            !s.is_free()
        });
        state
    }

    /// Take a shared lock on every kind, or none
    pub fn try_read(&self, sector: SectorId, kinds: FileKinds, scope: &CancellationToken) -> bool {
        if scope.is_cancelled() {
            return false;
        }
        let mut state = self.lock_pruned();
        if kinds
            .iter()
            .any(|kind| state.get(&(sector, kind)).is_some_and(|s| s.writer.is_some()))
        {
            return false;
        }
        for kind in kinds.iter() {
            state.entry((sector, kind)).or_default().readers.push(scope.clone());
        }
        true
    }

    /// Take an exclusive lock on every kind, or none
    pub fn try_write(&self, sector: SectorId, kinds: FileKinds, scope: &CancellationToken) -> bool {
        if scope.is_cancelled() {
            return false;
        }
        let mut state = self.lock_pruned();
        if kinds.iter().any(|kind| state.contains_key(&(sector, kind))) {
            return false;
        }
        for kind in kinds.iter() {
            state.entry((sector, kind)).or_default().writer = Some(scope.clone());
        }
        true
    }

    /// Number of (sector, kind) pairs currently locked
    #[must_use]
    pub fn held(&self) -> usize {
        self.lock_pruned().len()
    }

    /// Whether any lock is held on the sector
    #[must_use]
    pub fn is_locked(&self, sector: SectorId) -> bool {
        self.lock_pruned().keys().any(|(s, _)| *s == sector)
    }
}

/// Proof of shared access to some kinds of one sector
///
/// Dropping the ticket cancels its scope, which releases the lock.
#[derive(Debug)]
pub struct LockTicket {
    sector: SectorId,
    scope: CancellationToken,
    _release: DropGuard,
}

impl LockTicket {
    pub const fn sector(&self) -> SectorId {
        self.sector
    }

    /// Token cancelled when the ticket is dropped
    pub const fn scope(&self) -> &CancellationToken {
        &self.scope
    }
}

/// Acquires read tickets from a storage index
#[derive(Clone)]
pub struct LockCoordinator {
    index: Arc<dyn SectorIndex>,
}

impl LockCoordinator {
    pub fn new(index: Arc<dyn SectorIndex>) -> Self {
        Self { index }
    }

    /// Try to take a shared lock on `kinds` of the sector
    ///
    /// Returns `Ok(None)` when the lock is busy. Errors are index failures
    /// and mean the coordinator itself is unusable. The ticket's scope is a
    /// child of `parent`, so cancelling `parent` also releases it.
    pub async fn try_acquire(
        &self,
        sector: SectorId,
        kinds: FileKinds,
        parent: &CancellationToken,
    ) -> Result<Option<LockTicket>, IndexError> {
        let scope = parent.child_token();
        // Armed before the index call so every exit path releases
        let ticket = LockTicket {
            sector,
            scope: scope.clone(),
            _release: scope.clone().drop_guard(),
        };

        if self.index.try_lock_read(sector, kinds, scope).await? {
            trace!(sector = %sector, kinds = %kinds, "read lock granted");
            Ok(Some(ticket))
        } else {
            Ok(None)
        }
    }
}
