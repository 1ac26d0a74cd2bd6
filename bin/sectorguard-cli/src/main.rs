//! SectorGuard CLI - Operator Command Line Interface
//!
//! Checks sector provability and manages sector data in local paths and the
//! remote object store.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sectorguard_checker::FaultChecker;
use sectorguard_common::config::AcquireMode;
use sectorguard_common::{Config, FileKind, RegisteredSealProof, RemoteStoreInfo, SectorId, SectorRef};
use sectorguard_index::PathIndex;
use sectorguard_s3::{RemoteBackend, RemoteConnector, S3Client, S3Connector};
use sectorguard_storage::{LocalBackend, LocalFs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable prefix for configuration overrides
const ENV_PREFIX: &str = "SECTORGUARD";

#[derive(Parser, Debug)]
#[command(name = "sectorguard-cli")]
#[command(about = "SectorGuard sector fault checker")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SECTORGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report which sectors are currently unprovable
    Check {
        /// Miner actor ID
        #[arg(long)]
        miner: u64,
        /// Comma-separated sector numbers
        #[arg(long, value_delimiter = ',', required = true)]
        sectors: Vec<u64>,
        /// Registered seal proof code the sectors were sealed with
        #[arg(long)]
        seal_proof: i64,
        /// Sectors checked concurrently
        #[arg(long)]
        concurrency: Option<usize>,
        /// Check sectors in sealing scratch space where they are instead of
        /// moving them into long-term storage first
        #[arg(long)]
        keep_in_place: bool,
    },
    /// List sector names stored remotely for a file kind
    List {
        /// File kind (unsealed, sealed, cache)
        #[arg(long)]
        kind: FileKind,
    },
    /// Upload a sector file or cache directory to the remote store
    Upload {
        #[arg(long)]
        kind: FileKind,
        /// Object name (usually the sector file name, e.g. s-t01000-2)
        #[arg(long)]
        name: String,
        #[arg(long)]
        path: PathBuf,
    },
    /// Move a sector file or directory; base names must match
    Move { from: PathBuf, to: PathBuf },
    /// Validate (or create) the remote store buckets
    Buckets {
        /// Create missing buckets instead of failing
        #[arg(long)]
        provision: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut builder = ::config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(::config::File::from(path));
    }
    let settings = builder
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .context("loading configuration")?;
    settings
        .try_deserialize()
        .context("parsing configuration")
}

fn remote_info(config: &Config) -> Result<&RemoteStoreInfo> {
    config
        .remote
        .as_ref()
        .context("no remote store configured ([remote] section)")
}

async fn connect_remote(config: &Config) -> Result<Arc<RemoteBackend>> {
    let connector = S3Connector::new(config.s3.clone());
    Ok(connector.connect(remote_info(config)?).await?)
}

async fn check(
    config: Config,
    miner: u64,
    numbers: Vec<u64>,
    seal_proof: i64,
    concurrency: Option<usize>,
    keep_in_place: bool,
) -> Result<()> {
    let proof_type = RegisteredSealProof::try_from(seal_proof)?;
    let sectors: Vec<SectorRef> = numbers
        .into_iter()
        .map(|number| SectorRef {
            id: SectorId::new(miner, number),
            proof_type,
        })
        .collect();

    let connector = Arc::new(S3Connector::new(config.s3.clone()));
    let mut index = PathIndex::new(config.storage.paths.clone());
    if let Some(info) = &config.remote {
        index = index.with_remote(connector.connect(info).await?);
    }

    let mut checker_config = config.checker.clone();
    if let Some(concurrency) = concurrency {
        checker_config.max_concurrent_checks = concurrency;
    }
    if keep_in_place {
        checker_config.acquire_mode = AcquireMode::Keep;
    }

    let cancel = CancellationToken::new();
    let checker = FaultChecker::builder(Arc::new(index), Arc::new(LocalFs::new()), connector)
        .config(checker_config)
        .cancellation(cancel.clone())
        .build();

    let post_proof = proof_type.registered_window_post_proof();
    let report = tokio::select! {
        report = checker.check_provable(post_proof, &sectors, None) => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling check");
            cancel.cancel();
            bail!("check cancelled");
        }
    };

    info!(checked = sectors.len(), faulty = report.len(), "check complete");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Check {
            miner,
            sectors,
            seal_proof,
            concurrency,
            keep_in_place,
        } => check(config, miner, sectors, seal_proof, concurrency, keep_in_place).await?,
        Commands::List { kind } => {
            let backend = connect_remote(&config).await?;
            for name in backend.list_sector_names(kind).await? {
                println!("{name}");
            }
        }
        Commands::Upload { kind, name, path } => {
            let backend = connect_remote(&config).await?;
            backend.upload(kind, &name, &path).await?;
            println!("Uploaded {} to {}/{}/{}", path.display(), backend.buckets().for_kind(kind), kind, name);
        }
        Commands::Move { from, to } => {
            LocalFs::new().move_path(&from, &to).await?;
            println!("Moved {} -> {}", from.display(), to.display());
        }
        Commands::Buckets { provision } => {
            let info = remote_info(&config)?.clone();
            let client = Arc::new(S3Client::new(&info, config.s3.clone())?);
            let backend = if provision {
                RemoteBackend::provision(info, client, config.s3.list_max_keys).await?
            } else {
                RemoteBackend::connect(info, client, config.s3.list_max_keys).await?
            };
            let buckets = backend.buckets();
            println!("Proof bucket: {}", buckets.proof);
            println!("Data bucket:  {}", buckets.data);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check() {
        let args = Args::try_parse_from([
            "sectorguard-cli",
            "check",
            "--miner",
            "1000",
            "--sectors",
            "1,2,3",
            "--seal-proof",
            "8",
        ])
        .unwrap();
        match args.command {
            Commands::Check {
                miner,
                sectors,
                seal_proof,
                keep_in_place,
                ..
            } => {
                assert_eq!(miner, 1000);
                assert_eq!(sectors, vec![1, 2, 3]);
                assert_eq!(seal_proof, 8);
                assert!(!keep_in_place);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_kind() {
        let args = Args::try_parse_from(["sectorguard-cli", "list", "--kind", "cache"]).unwrap();
        assert!(matches!(args.command, Commands::List { kind: FileKind::Cache }));
        assert!(Args::try_parse_from(["sectorguard-cli", "list", "--kind", "tree"]).is_err());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sectorguard.toml");
        std::fs::write(
            &path,
            r#"
[[storage.paths]]
path = "/data/store"

[[storage.paths]]
path = "/data/seal"
can_seal = true
can_store = false

[remote]
endpoint = "127.0.0.1:9000"
access_key = "ak"
secret_key = "sk"
bucket = "lotus"
namespace = "ns"

[checker]
max_concurrent_checks = 4
acquire_mode = "keep"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.storage.paths.len(), 2);
        assert!(!config.storage.paths[1].can_store);
        assert_eq!(config.storage.paths[0].weight, 10);
        let remote = config.remote.unwrap();
        assert_eq!(remote.region, "us-west-2");
        assert_eq!(remote.data_bucket(), "lotus-ns-data");
        assert_eq!(config.checker.max_concurrent_checks, 4);
        assert_eq!(config.checker.acquire_mode, AcquireMode::Keep);
        assert_eq!(config.s3.list_max_keys, 1000);
    }
}
