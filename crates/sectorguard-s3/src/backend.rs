//! Sector-aware remote backend
//!
//! Objects are keyed `<kind>/<sector name>[/<entry>]`. Cache artifacts live
//! in the proof bucket, sealed and unsealed payloads in the data bucket.

use crate::api::ObjectApi;
use crate::error::S3Error;
use futures::future::join_all;
use sectorguard_common::{
    BucketSet, Error, ExpectedSize, FileKind, RemoteLocation, RemoteStoreInfo, Result,
};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A remote object that failed its existence check
#[derive(Debug, Error)]
pub enum ObjectFault {
    #[error("object {bucket}/{key} not found")]
    Missing { bucket: String, key: String },

    #[error("object {bucket}/{key} is wrong size (got {got}, expect {want})")]
    SizeMismatch {
        bucket: String,
        key: String,
        got: u64,
        want: u64,
    },

    #[error("checking object {bucket}/{key}: {source}")]
    Backend {
        bucket: String,
        key: String,
        #[source]
        source: S3Error,
    },
}

/// Remote backend bound to one store's bucket pair
///
/// Immutable after construction; safe to share between concurrent checks.
pub struct RemoteBackend {
    api: Arc<dyn ObjectApi>,
    info: RemoteStoreInfo,
    buckets: BucketSet,
    list_max_keys: u32,
}

impl RemoteBackend {
    /// Connect to a store whose buckets already exist
    ///
    /// Fails with `Error::BucketMissing` when either bucket is absent.
    pub async fn connect(
        info: RemoteStoreInfo,
        api: Arc<dyn ObjectApi>,
        list_max_keys: u32,
    ) -> Result<Self> {
        let buckets = info.bucket_set();
        let existing: BTreeSet<String> = api.list_buckets().await?.into_iter().collect();

        for bucket in [&buckets.proof, &buckets.data] {
            if !existing.contains(bucket) {
                warn!(bucket = %bucket, endpoint = %info.endpoint, "required bucket is missing");
                return Err(Error::BucketMissing(bucket.clone()));
            }
        }

        debug!(proof = %buckets.proof, data = %buckets.data, "remote backend connected");
        Ok(Self {
            api,
            info,
            buckets,
            list_max_keys: list_max_keys.max(1),
        })
    }

    /// Create any missing bucket, wait for it, then connect
    ///
    /// Operator tooling only; `connect` never creates buckets.
    pub async fn provision(
        info: RemoteStoreInfo,
        api: Arc<dyn ObjectApi>,
        list_max_keys: u32,
    ) -> Result<Self> {
        let buckets = info.bucket_set();
        for bucket in [&buckets.proof, &buckets.data] {
            if api.head_bucket(bucket).await? {
                continue;
            }
            info!(bucket = %bucket, "creating bucket");
            api.create_bucket(bucket).await?;
            api.wait_until_bucket_exists(bucket).await?;
        }
        Self::connect(info, api, list_max_keys).await
    }

    pub const fn info(&self) -> &RemoteStoreInfo {
        &self.info
    }

    pub const fn buckets(&self) -> &BucketSet {
        &self.buckets
    }

    /// Location descriptor for one kind of a sector in this store
    #[must_use]
    pub fn location(&self, kind: FileKind, sector_name: &str) -> RemoteLocation {
        RemoteLocation {
            info: self.info.clone(),
            kind,
            sector_name: sector_name.to_string(),
        }
    }

    fn key(kind: FileKind, object_name: &str) -> String {
        format!("{}/{}", kind.token(), object_name)
    }

    /// Names of all sectors with at least one object of `kind`
    pub async fn list_sector_names(&self, kind: FileKind) -> Result<BTreeSet<String>> {
        let bucket = self.buckets.for_kind(kind);
        let prefix = format!("{}/", kind.token());
        let objects = self
            .api
            .list_objects(bucket, &prefix, self.list_max_keys)
            .await?;

        let mut names = BTreeSet::new();
        for object in objects {
            let mut segments = object.key.split('/');
            match (segments.next(), segments.next()) {
                (Some(_), Some(name)) if !name.is_empty() => {
                    names.insert(name.to_string());
                }
                // Directory marker for the prefix itself
                (Some(_), Some(_)) => {}
                _ => {
                    return Err(S3Error::MalformedKey {
                        bucket: bucket.to_string(),
                        key: object.key,
                    }
                    .into());
                }
            }
        }
        Ok(names)
    }

    /// Upload a file, or every entry of a directory, and wait until visible
    ///
    /// A directory fans out to one object per entry keyed
    /// `<kind>/<object_name>/<entry>`.
    pub async fn upload(&self, kind: FileKind, object_name: &str, local_path: &Path) -> Result<()> {
        let bucket = self.buckets.for_kind(kind);
        let metadata = tokio::fs::metadata(local_path).await?;

        let uploads: Vec<(String, PathBuf)> = if metadata.is_dir() {
            let mut entries = Vec::new();
            let mut dir = tokio::fs::read_dir(local_path).await?;
            while let Some(entry) = dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                entries.push((Self::key(kind, &format!("{object_name}/{name}")), entry.path()));
            }
            entries
        } else {
            vec![(Self::key(kind, object_name), local_path.to_path_buf())]
        };

        if uploads.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{} is an empty directory",
                local_path.display()
            )));
        }

        let results = join_all(uploads.iter().map(|(key, path)| async move {
            self.api.put_object(bucket, key, path).await?;
            self.api.wait_until_object_exists(bucket, key).await
        }))
        .await;

        for ((key, _), result) in uploads.iter().zip(results) {
            if let Err(e) = result {
                warn!(bucket, key = %key, error = %e, "upload failed");
                return Err(e.into());
            }
        }

        info!(bucket, kind = %kind, object_name, objects = uploads.len(), "upload complete");
        Ok(())
    }

    /// Verify that every named object exists with the expected size
    ///
    /// Uses HEAD requests only. The first failing object is returned.
    pub async fn check_exists(
        &self,
        kind: FileKind,
        object_names: &[String],
        expected: ExpectedSize,
    ) -> std::result::Result<(), ObjectFault> {
        let bucket = self.buckets.for_kind(kind);
        for name in object_names {
            let key = Self::key(kind, name);
            let size = self
                .api
                .head_object(bucket, &key)
                .await
                .map_err(|source| ObjectFault::Backend {
                    bucket: bucket.to_string(),
                    key: key.clone(),
                    source,
                })?;

            match (size, expected) {
                (None, _) => {
                    return Err(ObjectFault::Missing {
                        bucket: bucket.to_string(),
                        key,
                    });
                }
                (Some(got), ExpectedSize::Exact(want)) if got != want => {
                    return Err(ObjectFault::SizeMismatch {
                        bucket: bucket.to_string(),
                        key,
                        got,
                        want,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether this store holds any object of `kind` for the sector
    pub async fn has_sector(&self, kind: FileKind, sector_name: &str) -> Result<bool> {
        let bucket = self.buckets.for_kind(kind);
        match kind {
            FileKind::Sealed | FileKind::Unsealed => Ok(self
                .api
                .head_object(bucket, &Self::key(kind, sector_name))
                .await?
                .is_some()),
            FileKind::Cache => {
                let prefix = format!("{}/", Self::key(kind, sector_name));
                let page = self.api.list_objects_page(bucket, &prefix, 1, None).await?;
                Ok(!page.objects.is_empty())
            }
        }
    }
}

impl fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("endpoint", &self.info.endpoint)
            .field("buckets", &self.buckets)
            .field("list_max_keys", &self.list_max_keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryObjectApi;

    fn info() -> RemoteStoreInfo {
        RemoteStoreInfo {
            endpoint: "127.0.0.1:9000".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            bucket: "lotus".into(),
            namespace: "ns".into(),
            region: "us-west-2".into(),
            use_tls: false,
        }
    }

    fn store() -> Arc<MemoryObjectApi> {
        Arc::new(MemoryObjectApi::with_buckets(["lotus-ns-proof", "lotus-ns-data"]))
    }

    #[tokio::test]
    async fn test_connect_requires_both_buckets() {
        let api = Arc::new(MemoryObjectApi::with_buckets(["lotus-ns-proof"]));
        let err = RemoteBackend::connect(info(), api.clone(), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BucketMissing(ref b) if b == "lotus-ns-data"));
        // Never provisions implicitly
        assert!(!api.head_bucket("lotus-ns-data").await.unwrap());
    }

    #[tokio::test]
    async fn test_provision_creates_buckets() {
        let api = Arc::new(MemoryObjectApi::new());
        let backend = RemoteBackend::provision(info(), api.clone(), 1000)
            .await
            .unwrap();
        assert_eq!(backend.buckets().proof, "lotus-ns-proof");
        assert!(api.head_bucket("lotus-ns-data").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_sector_names_dedups() {
        let api = store();
        for entry in ["t_aux", "p_aux", "sc-02-data-tree-r-last-0.dat"] {
            api.insert_object("lotus-ns-proof", &format!("cache/s-t01-1/{entry}"), 1);
        }
        api.insert_object("lotus-ns-proof", "cache/s-t01-2/t_aux", 1);
        api.insert_object("lotus-ns-proof", "cache/", 0);
        api.insert_object("lotus-ns-data", "sealed/s-t01-3", 1);

        let backend = RemoteBackend::connect(info(), api, 2).await.unwrap();
        let names = backend.list_sector_names(FileKind::Cache).await.unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["s-t01-1", "s-t01-2"]);

        let sealed = backend.list_sector_names(FileKind::Sealed).await.unwrap();
        assert_eq!(sealed.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = dir.path().join("s-t01-5");
        tokio::fs::write(&sealed, vec![0u8; 64]).await.unwrap();

        let cache = dir.path().join("cache").join("s-t01-5");
        tokio::fs::create_dir_all(&cache).await.unwrap();
        tokio::fs::write(cache.join("t_aux"), b"t").await.unwrap();
        tokio::fs::write(cache.join("p_aux"), b"pp").await.unwrap();

        let api = store();
        let backend = RemoteBackend::connect(info(), api.clone(), 1000).await.unwrap();
        backend.upload(FileKind::Sealed, "s-t01-5", &sealed).await.unwrap();
        backend.upload(FileKind::Cache, "s-t01-5", &cache).await.unwrap();

        assert_eq!(api.object_size("lotus-ns-data", "sealed/s-t01-5"), Some(64));
        assert_eq!(api.object_size("lotus-ns-proof", "cache/s-t01-5/p_aux"), Some(2));
        assert!(backend.has_sector(FileKind::Cache, "s-t01-5").await.unwrap());
        assert!(backend.has_sector(FileKind::Sealed, "s-t01-5").await.unwrap());
        assert!(!backend.has_sector(FileKind::Unsealed, "s-t01-5").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_exists() {
        let api = store();
        api.insert_object("lotus-ns-data", "sealed/s-t01-1", 512);
        let backend = RemoteBackend::connect(info(), api, 1000).await.unwrap();

        let names = vec!["s-t01-1".to_string()];
        backend
            .check_exists(FileKind::Sealed, &names, ExpectedSize::Exact(512))
            .await
            .unwrap();

        let err = backend
            .check_exists(FileKind::Sealed, &names, ExpectedSize::Exact(1024))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "object lotus-ns-data/sealed/s-t01-1 is wrong size (got 512, expect 1024)"
        );

        let missing = vec!["s-t01-1/t_aux".to_string()];
        let err = backend
            .check_exists(FileKind::Cache, &missing, ExpectedSize::Unconstrained)
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectFault::Missing { ref bucket, .. } if bucket == "lotus-ns-proof"));
    }
}
