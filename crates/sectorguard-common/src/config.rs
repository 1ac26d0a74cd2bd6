//! Configuration types for SectorGuard
//!
//! This module defines configuration structures used across components.

use crate::types::RemoteStoreInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for SectorGuard
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local storage paths
    pub storage: StorageConfig,
    /// Remote S3-compatible store (optional)
    pub remote: Option<RemoteStoreInfo>,
    /// S3 client tuning
    pub s3: S3ClientConfig,
    /// Fault checker settings
    pub checker: CheckerConfig,
}

/// Local storage configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage paths, each holding `sealed/`, `cache/` and `unsealed/` subdirectories
    pub paths: Vec<StoragePathConfig>,
}

/// Configuration for a single storage path
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoragePathConfig {
    /// Root directory of the path
    pub path: PathBuf,
    /// Sealing scratch space
    #[serde(default)]
    pub can_seal: bool,
    /// Long-term storage
    #[serde(default = "default_true")]
    pub can_store: bool,
    /// Preference when choosing a relocation target (higher wins)
    #[serde(default = "default_weight")]
    pub weight: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_weight() -> u64 {
    10
}

impl Default for StoragePathConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/sectorguard/store"),
            can_seal: false,
            can_store: true,
            weight: default_weight(),
        }
    }
}

/// S3 client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct S3ClientConfig {
    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,
    /// Page size for object listing
    pub list_max_keys: u32,
    /// Files larger than this are uploaded with multipart upload
    pub multipart_threshold: u64,
    /// Part size for multipart upload
    pub multipart_part_size: u64,
    /// Delay between existence polls (milliseconds)
    pub waiter_interval_ms: u64,
    /// Maximum number of existence polls
    pub waiter_max_attempts: u32,
}

impl Default for S3ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5 * 60 * 1000,
            list_max_keys: 1000,
            multipart_threshold: 64 * 1024 * 1024, // 64 MB
            multipart_part_size: 16 * 1024 * 1024, // 16 MB
            waiter_interval_ms: 5000,
            waiter_max_attempts: 20,
        }
    }
}

/// What the checker does with files found outside a long-term storage path
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    /// Check files where they are
    Keep,
    /// Move them into a storage path before checking
    #[default]
    Move,
}

/// Fault checker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Sectors checked concurrently within one batch
    pub max_concurrent_checks: usize,
    /// Relocation policy
    pub acquire_mode: AcquireMode,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: 1,
            acquire_mode: AcquireMode::Move,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.storage.paths.is_empty());
        assert!(config.remote.is_none());
        assert_eq!(config.s3.list_max_keys, 1000);
        assert_eq!(config.checker.max_concurrent_checks, 1);
        assert_eq!(config.checker.acquire_mode, AcquireMode::Move);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "storage": { "paths": [ { "path": "/mnt/store" } ] },
            "remote": {
                "endpoint": "10.0.0.1:9000",
                "access_key": "ak",
                "secret_key": "sk",
                "bucket": "lotus",
                "namespace": "f01000"
            },
            "checker": { "max_concurrent_checks": 4, "acquire_mode": "keep" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let path = &config.storage.paths[0];
        assert!(path.can_store);
        assert!(!path.can_seal);
        assert_eq!(path.weight, 10);
        let remote = config.remote.unwrap();
        assert_eq!(remote.region, "us-west-2");
        assert!(!remote.use_tls);
        assert_eq!(config.checker.acquire_mode, AcquireMode::Keep);
        assert_eq!(config.s3.waiter_max_attempts, 20);
    }
}
