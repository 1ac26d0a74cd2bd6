//! Object store API seam
//!
//! `ObjectApi` is the subset of the S3 REST API the remote backend needs.
//! `S3Client` speaks it over HTTP; `MemoryObjectApi` keeps it in memory.

use crate::error::S3Error;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// One listed object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// One page of a listing
#[derive(Clone, Debug, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    /// Token for the next page, `None` on the last page
    pub next_continuation_token: Option<String>,
}

/// Polling schedule for the wait-until-exists helpers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Waiter {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for Waiter {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 20,
        }
    }
}

/// S3-compatible object store operations
#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// Names of all buckets visible to the credentials
    async fn list_buckets(&self) -> Result<Vec<String>, S3Error>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error>;

    /// Whether the bucket exists
    async fn head_bucket(&self, bucket: &str) -> Result<bool, S3Error>;

    /// One page of objects under `prefix`, at most `max_keys` long
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, S3Error>;

    /// Upload a local file to `key`
    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<(), S3Error>;

    /// Size of the object, `None` when it does not exist
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<u64>, S3Error>;

    /// Polling schedule for the waiters
    fn waiter(&self) -> Waiter {
        Waiter::default()
    }

    /// All objects under `prefix`, following continuation tokens
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: u32,
    ) -> Result<Vec<ObjectSummary>, S3Error> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .list_objects_page(bucket, prefix, max_keys, token.as_deref())
                .await?;
            objects.extend(page.objects);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => return Ok(objects),
            }
        }
    }

    /// Poll until the bucket exists
    async fn wait_until_bucket_exists(&self, bucket: &str) -> Result<(), S3Error> {
        let waiter = self.waiter();
        for attempt in 1..=waiter.max_attempts {
            if self.head_bucket(bucket).await? {
                return Ok(());
            }
            if attempt < waiter.max_attempts {
                tokio::time::sleep(waiter.interval).await;
            }
        }
        Err(S3Error::WaiterTimeout(format!("bucket {bucket}")))
    }

    /// Poll until the object exists, returning its size
    async fn wait_until_object_exists(&self, bucket: &str, key: &str) -> Result<u64, S3Error> {
        let waiter = self.waiter();
        for attempt in 1..=waiter.max_attempts {
            if let Some(size) = self.head_object(bucket, key).await? {
                return Ok(size);
            }
            if attempt < waiter.max_attempts {
                tokio::time::sleep(waiter.interval).await;
            }
        }
        Err(S3Error::WaiterTimeout(format!("object {bucket}/{key}")))
    }
}
