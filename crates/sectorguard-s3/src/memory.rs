//! In-memory object store
//!
//! Keeps object sizes only; payloads are never stored. Used by tests and
//! for dry runs without a real endpoint.

use crate::api::{ObjectApi, ObjectPage, ObjectSummary, Waiter};
use crate::backend::RemoteBackend;
use crate::connector::RemoteConnector;
use crate::error::S3Error;
use async_trait::async_trait;
use parking_lot::RwLock;
use sectorguard_common::RemoteStoreInfo;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct MemoryStats {
    pub list_buckets: AtomicU64,
    pub list_objects: AtomicU64,
    pub put_object: AtomicU64,
    pub head_object: AtomicU64,
}

/// In-memory `ObjectApi`
#[derive(Debug, Default)]
pub struct MemoryObjectApi {
    /// bucket -> key -> size
    buckets: RwLock<HashMap<String, BTreeMap<String, u64>>>,
    stats: MemoryStats,
}

impl MemoryObjectApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already has the given buckets
    #[must_use]
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.buckets.write();
            for bucket in buckets {
                map.entry(bucket.into()).or_default();
            }
        }
        store
    }

    /// Insert an object of `size` bytes, creating the bucket if needed
    pub fn insert_object(&self, bucket: &str, key: &str, size: u64) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), size);
    }

    /// Remove an object, returning whether it existed
    pub fn remove_object(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .write()
            .get_mut(bucket)
            .is_some_and(|objects| objects.remove(key).is_some())
    }

    /// Size of an object, if present
    #[must_use]
    pub fn object_size(&self, bucket: &str, key: &str) -> Option<u64> {
        self.buckets.read().get(bucket)?.get(key).copied()
    }

    /// Get statistics
    pub const fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    fn no_such_bucket(operation: &'static str, bucket: &str) -> S3Error {
        S3Error::Status {
            operation,
            status: 404,
            code: "NoSuchBucket".to_string(),
            message: format!("bucket {bucket} does not exist"),
        }
    }
}

#[async_trait]
impl ObjectApi for MemoryObjectApi {
    async fn list_buckets(&self) -> Result<Vec<String>, S3Error> {
        self.stats.list_buckets.fetch_add(1, Ordering::Relaxed);
        let mut names: Vec<_> = self.buckets.read().keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.buckets.write().entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<bool, S3Error> {
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, S3Error> {
        self.stats.list_objects.fetch_add(1, Ordering::Relaxed);
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket("ListObjectsV2", bucket))?;

        // The continuation token is the last key of the previous page
        let page_size = usize::try_from(max_keys.max(1)).unwrap_or(usize::MAX);
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation_token.is_none_or(|token| key.as_str() > token));

        let page: Vec<ObjectSummary> = matching
            .by_ref()
            .take(page_size)
            .map(|(key, size)| ObjectSummary {
                key: key.clone(),
                size: *size,
            })
            .collect();
        let more = matching.next().is_some();

        Ok(ObjectPage {
            next_continuation_token: if more {
                page.last().map(|o| o.key.clone())
            } else {
                None
            },
            objects: page,
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<(), S3Error> {
        self.stats.put_object.fetch_add(1, Ordering::Relaxed);
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|source| S3Error::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket("PutObject", bucket))?;
        objects.insert(key.to_string(), size);
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<u64>, S3Error> {
        self.stats.head_object.fetch_add(1, Ordering::Relaxed);
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket("HeadObject", bucket))?;
        Ok(objects.get(key).copied())
    }

    fn waiter(&self) -> Waiter {
        Waiter {
            interval: Duration::from_millis(1),
            max_attempts: 3,
        }
    }
}

/// Connector handing out backends over one shared in-memory store
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    api: Arc<MemoryObjectApi>,
    list_max_keys: u32,
}

impl MemoryConnector {
    #[must_use]
    pub const fn new(api: Arc<MemoryObjectApi>) -> Self {
        Self {
            api,
            list_max_keys: 1000,
        }
    }

    #[must_use]
    pub fn api(&self) -> &Arc<MemoryObjectApi> {
        &self.api
    }
}

#[async_trait]
impl RemoteConnector for MemoryConnector {
    async fn connect(
        &self,
        info: &RemoteStoreInfo,
    ) -> sectorguard_common::Result<Arc<RemoteBackend>> {
        let backend =
            RemoteBackend::connect(info.clone(), self.api.clone(), self.list_max_keys).await?;
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pagination() {
        let api = MemoryObjectApi::with_buckets(["b"]);
        for i in 0..5 {
            api.insert_object("b", &format!("cache/s-t01-1/f{i}"), i);
        }
        api.insert_object("b", "sealed/s-t01-1", 10);

        let page = api.list_objects_page("b", "cache/", 2, None).await.unwrap();
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.next_continuation_token.as_deref(), Some("cache/s-t01-1/f1"));

        let all = api.list_objects("b", "cache/", 2).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(api.stats().list_objects.load(Ordering::Relaxed), 1 + 3);
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let api = MemoryObjectApi::new();
        let err = api.head_object("nope", "k").await.unwrap_err();
        assert!(matches!(err, S3Error::Status { status: 404, .. }));
        assert!(!api.head_bucket("nope").await.unwrap());
        api.create_bucket("nope").await.unwrap();
        assert!(api.head_bucket("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_until_object_exists() {
        let api = MemoryObjectApi::with_buckets(["b"]);
        let err = api.wait_until_object_exists("b", "k").await.unwrap_err();
        assert!(matches!(err, S3Error::WaiterTimeout(_)));
        api.insert_object("b", "k", 9);
        assert_eq!(api.wait_until_object_exists("b", "k").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_connector_shares_store() {
        let api = Arc::new(MemoryObjectApi::with_buckets(["lotus-ns-proof"]));
        let connector = MemoryConnector::new(api.clone());
        let info = RemoteStoreInfo {
            endpoint: "127.0.0.1:9000".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            bucket: "lotus".into(),
            namespace: "ns".into(),
            region: "us-west-2".into(),
            use_tls: false,
        };

        let err = connector.connect(&info).await.unwrap_err();
        assert!(matches!(err, sectorguard_common::Error::BucketMissing(ref b) if b == "lotus-ns-data"));

        api.insert_object("lotus-ns-data", "sealed/s-t01-1", 8);
        let backend = connector.connect(&info).await.unwrap();
        assert_eq!(backend.buckets().data, "lotus-ns-data");
        assert!(Arc::ptr_eq(connector.api(), &api));
    }
}
