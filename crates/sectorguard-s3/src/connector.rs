//! Remote backend connectors
//!
//! A sector's locations may name any number of remote stores. Connectors
//! hand out one `RemoteBackend` per distinct store.

use crate::backend::RemoteBackend;
use crate::client::S3Client;
use async_trait::async_trait;
use parking_lot::Mutex;
use sectorguard_common::config::S3ClientConfig;
use sectorguard_common::{Error, RemoteStoreInfo, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Source of connected remote backends
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Backend for the given store, validating its buckets on first use
    async fn connect(&self, info: &RemoteStoreInfo) -> Result<Arc<RemoteBackend>>;
}

type BackendCell = Arc<OnceCell<Arc<RemoteBackend>>>;

/// One lazily connected backend per store
///
/// Connecting to one store never waits on another; concurrent callers for
/// the same store share a single attempt. Failed attempts are not cached.
#[derive(Default)]
pub struct BackendCache {
    cells: Mutex<HashMap<RemoteStoreInfo, BackendCell>>,
}

impl BackendCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_connect<F, Fut>(&self, info: &RemoteStoreInfo, connect: F) -> Result<Arc<RemoteBackend>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RemoteBackend>>,
    {
        let cell = self.cells.lock().entry(info.clone()).or_default().clone();
        let backend = cell
            .get_or_try_init(|| async {
                let backend = connect().await?;
                debug!(endpoint = %info.endpoint, bucket = %info.bucket, namespace = %info.namespace, "cached remote backend");
                Ok::<_, Error>(Arc::new(backend))
            })
            .await?;
        Ok(backend.clone())
    }

    /// Number of connected backends
    #[must_use]
    pub fn connected(&self) -> usize {
        self.cells.lock().values().filter(|cell| cell.initialized()).count()
    }
}

/// Connector over real S3 endpoints, caching one backend per store
pub struct S3Connector {
    config: S3ClientConfig,
    cache: BackendCache,
}

impl S3Connector {
    #[must_use]
    pub fn new(config: S3ClientConfig) -> Self {
        Self {
            config,
            cache: BackendCache::new(),
        }
    }

    /// Number of cached backends
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.connected()
    }
}

#[async_trait]
impl RemoteConnector for S3Connector {
    async fn connect(&self, info: &RemoteStoreInfo) -> Result<Arc<RemoteBackend>> {
        self.cache
            .get_or_connect(info, || async {
                let client = S3Client::new(info, self.config.clone()).map_err(Error::from)?;
                RemoteBackend::connect(info.clone(), Arc::new(client), self.config.list_max_keys).await
            })
            .await
    }
}
