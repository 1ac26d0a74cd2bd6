//! S3 wire client
//!
//! Path-style S3 REST client over reqwest, signed with SigV4. Uploads above
//! the configured threshold go through multipart upload.

use crate::api::{ObjectApi, ObjectPage, ObjectSummary, Waiter};
use crate::error::S3Error;
use crate::sigv4::{EMPTY_PAYLOAD_SHA256, SigV4Signer, encode_path, encode_query, hex_sha256, url_encode};
use crate::xml::{
    CompleteMultipartUpload, CompletedPart, CreateBucketConfiguration, ErrorResponse,
    InitiateMultipartUploadResult, ListAllMyBucketsResult, ListBucketResult, from_xml, to_xml,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{CONTENT_LENGTH, ETAG, HeaderMap};
use reqwest::{Method, Response, StatusCode, Url};
use sectorguard_common::RemoteStoreInfo;
use sectorguard_common::config::S3ClientConfig;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Smallest part size S3 accepts (except for the last part)
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Region that takes no `LocationConstraint` on bucket creation
const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible REST client
pub struct S3Client {
    http: reqwest::Client,
    endpoint: Url,
    region: String,
    signer: SigV4Signer,
    config: S3ClientConfig,
}

impl S3Client {
    /// Create a client for the given remote store
    pub fn new(info: &RemoteStoreInfo, config: S3ClientConfig) -> Result<Self, S3Error> {
        let endpoint = Url::parse(&info.endpoint_url())
            .map_err(|e| S3Error::InvalidEndpoint(format!("{}: {}", info.endpoint, e)))?;
        if endpoint.host_str().is_none() {
            return Err(S3Error::InvalidEndpoint(info.endpoint.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            region: info.region.clone(),
            signer: SigV4Signer::new(&info.access_key, &info.secret_key, &info.region),
            config,
        })
    }

    /// Get the endpoint URL
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Build a path-style URL
    fn url(&self, bucket: Option<&str>, key: Option<&str>, query: &str) -> Url {
        let mut path = self.endpoint.path().trim_end_matches('/').to_string();
        if let Some(bucket) = bucket {
            path.push('/');
            path.push_str(&url_encode(bucket));
        }
        if let Some(key) = key {
            path.push('/');
            path.push_str(&encode_path(key));
        }
        if path.is_empty() {
            path.push('/');
        }

        let mut url = self.endpoint.clone();
        url.set_path(&path);
        url.set_query(if query.is_empty() { None } else { Some(query) });
        url
    }

    /// Sign and send a request
    async fn send(&self, method: Method, url: Url, body: Bytes) -> Result<Response, S3Error> {
        let payload_hash = if body.is_empty() {
            EMPTY_PAYLOAD_SHA256.to_string()
        } else {
            hex_sha256(&body)
        };

        let mut headers = HeaderMap::new();
        self.signer
            .sign(method.as_str(), &url, &mut headers, &payload_hash, Utc::now())?;

        let response = self
            .http
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    /// Turn a non-2xx response into an error
    async fn expect_success(operation: &'static str, response: Response) -> Result<Response, S3Error> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::status_error(operation, response).await)
        }
    }

    async fn status_error(operation: &'static str, response: Response) -> S3Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match from_xml::<ErrorResponse>(&body) {
            Ok(err) => (err.code, err.message),
            Err(_) => (
                status.canonical_reason().unwrap_or("Unknown").to_string(),
                body,
            ),
        };
        S3Error::Status {
            operation,
            status: status.as_u16(),
            code,
            message,
        }
    }

    async fn put_single(&self, bucket: &str, key: &str, path: &Path) -> Result<(), S3Error> {
        let body = tokio::fs::read(path).await.map_err(|source| S3Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let url = self.url(Some(bucket), Some(key), "");
        let response = self.send(Method::PUT, url, Bytes::from(body)).await?;
        Self::expect_success("PutObject", response).await?;
        Ok(())
    }

    async fn put_multipart(&self, bucket: &str, key: &str, path: &Path) -> Result<(), S3Error> {
        let url = self.url(Some(bucket), Some(key), &encode_query(&[("uploads", "")]));
        let response = self.send(Method::POST, url, Bytes::new()).await?;
        let response = Self::expect_success("CreateMultipartUpload", response).await?;
        let init: InitiateMultipartUploadResult = from_xml(&response.text().await?)?;
        let upload_id = init.upload_id;

        let parts = match self.upload_parts(bucket, key, path, &upload_id).await {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                return Err(e);
            }
        };

        let body = to_xml(&CompleteMultipartUpload { parts })?;
        let url = self.url(
            Some(bucket),
            Some(key),
            &encode_query(&[("uploadId", upload_id.as_str())]),
        );
        let response = self.send(Method::POST, url, Bytes::from(body)).await?;
        Self::expect_success("CompleteMultipartUpload", response).await?;
        Ok(())
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, S3Error> {
        let io_err = |source| S3Error::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).await.map_err(io_err)?;
        let part_size = usize::try_from(self.config.multipart_part_size.max(MIN_PART_SIZE))
            .unwrap_or(usize::MAX);

        let mut parts = Vec::new();
        let mut part_number: u32 = 1;
        loop {
            let mut buf = vec![0u8; part_size];
            let filled = read_full(&mut file, &mut buf).await.map_err(io_err)?;
            if filled == 0 {
                break;
            }
            buf.truncate(filled);

            let number = part_number.to_string();
            let query = encode_query(&[("partNumber", number.as_str()), ("uploadId", upload_id)]);
            let url = self.url(Some(bucket), Some(key), &query);
            let response = self.send(Method::PUT, url, Bytes::from(buf)).await?;
            let response = Self::expect_success("UploadPart", response).await?;
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            debug!(bucket, key, part_number, bytes = filled, "uploaded part");
            parts.push(CompletedPart { part_number, etag });

            if filled < part_size {
                break;
            }
            part_number += 1;
        }
        Ok(parts)
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        let url = self.url(Some(bucket), Some(key), &encode_query(&[("uploadId", upload_id)]));
        let result = match self.send(Method::DELETE, url, Bytes::new()).await {
            Ok(response) => Self::expect_success("AbortMultipartUpload", response)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(bucket, key, upload_id, error = %e, "failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl ObjectApi for S3Client {
    async fn list_buckets(&self) -> Result<Vec<String>, S3Error> {
        let url = self.url(None, None, "");
        let response = self.send(Method::GET, url, Bytes::new()).await?;
        let response = Self::expect_success("ListBuckets", response).await?;
        let result: ListAllMyBucketsResult = from_xml(&response.text().await?)?;
        Ok(result.buckets.bucket.into_iter().map(|b| b.name).collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let body = if self.region == DEFAULT_REGION {
            Bytes::new()
        } else {
            Bytes::from(to_xml(&CreateBucketConfiguration {
                location_constraint: self.region.clone(),
            })?)
        };
        let url = self.url(Some(bucket), None, "");
        let response = self.send(Method::PUT, url, body).await?;
        Self::expect_success("CreateBucket", response).await?;
        debug!(bucket, "created bucket");
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<bool, S3Error> {
        let url = self.url(Some(bucket), None, "");
        let response = self.send(Method::HEAD, url, Bytes::new()).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::status_error("HeadBucket", response).await),
        }
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, S3Error> {
        let max_keys = max_keys.to_string();
        let mut params = vec![("list-type", "2"), ("prefix", prefix), ("max-keys", max_keys.as_str())];
        if let Some(token) = continuation_token {
            params.push(("continuation-token", token));
        }

        let url = self.url(Some(bucket), None, &encode_query(&params));
        let response = self.send(Method::GET, url, Bytes::new()).await?;
        let response = Self::expect_success("ListObjectsV2", response).await?;
        let result: ListBucketResult = from_xml(&response.text().await?)?;

        Ok(ObjectPage {
            objects: result
                .contents
                .into_iter()
                .map(|c| ObjectSummary {
                    key: c.key,
                    size: c.size,
                })
                .collect(),
            next_continuation_token: if result.is_truncated {
                result.next_continuation_token
            } else {
                None
            },
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<(), S3Error> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|source| S3Error::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        if size > self.config.multipart_threshold {
            self.put_multipart(bucket, key, path).await?;
        } else {
            self.put_single(bucket, key, path).await?;
        }
        debug!(bucket, key, size, "uploaded object");
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<u64>, S3Error> {
        let url = self.url(Some(bucket), Some(key), "");
        let response = self.send(Method::HEAD, url, Bytes::new()).await?;
        match response.status() {
            status if status.is_success() => {
                let size = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                Ok(Some(size))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::status_error("HeadObject", response).await),
        }
    }

    fn waiter(&self) -> Waiter {
        Waiter {
            interval: Duration::from_millis(self.config.waiter_interval_ms),
            max_attempts: self.config.waiter_max_attempts.max(1),
        }
    }
}

/// Read until `buf` is full or EOF, returning the bytes read
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn info(endpoint: &str) -> RemoteStoreInfo {
        RemoteStoreInfo {
            endpoint: endpoint.into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            bucket: "lotus".into(),
            namespace: "ns".into(),
            region: "us-west-2".into(),
            use_tls: false,
        }
    }

    #[test]
    fn test_path_style_urls() {
        let client = S3Client::new(&info("127.0.0.1:9000"), S3ClientConfig::default()).unwrap();
        assert_eq!(client.url(None, None, "").as_str(), "http://127.0.0.1:9000/");
        assert_eq!(
            client
                .url(Some("lotus-ns-proof"), Some("cache/s-t01-1/t_aux"), "")
                .as_str(),
            "http://127.0.0.1:9000/lotus-ns-proof/cache/s-t01-1/t_aux"
        );
        let query = encode_query(&[("list-type", "2"), ("prefix", "cache/")]);
        assert_eq!(
            client.url(Some("b"), None, &query).as_str(),
            "http://127.0.0.1:9000/b?list-type=2&prefix=cache%2F"
        );
    }

    #[test]
    fn test_endpoint_with_scheme_and_base_path() {
        let client =
            S3Client::new(&info("https://s3.example.com/base/"), S3ClientConfig::default()).unwrap();
        assert_eq!(
            client.url(Some("b"), Some("k"), "").as_str(),
            "https://s3.example.com/base/b/k"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            S3Client::new(&info("http://"), S3ClientConfig::default()),
            Err(S3Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_waiter_from_config() {
        let config = S3ClientConfig {
            waiter_interval_ms: 10,
            waiter_max_attempts: 0,
            ..S3ClientConfig::default()
        };
        let client = S3Client::new(&info("localhost:9000"), config).unwrap();
        let waiter = client.waiter();
        assert_eq!(waiter.interval, Duration::from_millis(10));
        assert_eq!(waiter.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_read_full_parts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, vec![7u8; 10]).unwrap();

        let mut file = File::open(&path).await.unwrap();
        let mut buf = vec![0u8; 4];
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 4);
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 4);
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 2);
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 0);
    }
}
