//! Core type definitions for SectorGuard
//!
//! This module defines the fundamental types used throughout the system
//! including sector identifiers, file-kind sets, proof types and the
//! storage location union.

use crate::error::Error;
use derive_more::{Display, From, Into};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Miner actor identifier (the owner of a sector)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
pub struct ActorId(pub u64);

/// Sector number, unique per miner
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
pub struct SectorNumber(pub u64);

/// Globally unique sector identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorId {
    /// Owning miner
    pub miner: ActorId,
    /// Sector number within the miner
    pub number: SectorNumber,
}

impl SectorId {
    /// Create a new sector ID
    #[must_use]
    pub const fn new(miner: u64, number: u64) -> Self {
        Self {
            miner: ActorId(miner),
            number: SectorNumber(number),
        }
    }

    /// Canonical file/object name of this sector (`s-t0<miner>-<number>`)
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("s-t0{}-{}", self.miner, self.number)
    }

    /// Parse a canonical sector file name back into an ID
    #[must_use]
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("s-t0")?;
        let (miner, number) = rest.split_once('-')?;
        Some(Self::new(miner.parse().ok()?, number.parse().ok()?))
    }
}

impl fmt::Debug for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectorId({}-{})", self.miner, self.number)
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.miner, self.number)
    }
}

impl FromStr for SectorId {
    type Err = Error;

    /// Parses `<miner>-<number>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (miner, number) = s
            .split_once('-')
            .ok_or_else(|| Error::invalid_argument(format!("malformed sector id: {s}")))?;
        let miner = miner
            .parse()
            .map_err(|_| Error::invalid_argument(format!("malformed miner id: {miner}")))?;
        let number = number
            .parse()
            .map_err(|_| Error::invalid_argument(format!("malformed sector number: {number}")))?;
        Ok(Self::new(miner, number))
    }
}

/// A sector together with the seal proof it was sealed with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRef {
    pub id: SectorId,
    pub proof_type: RegisteredSealProof,
}

impl fmt::Display for SectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.id, self.proof_type)
    }
}

/// One kind of sector file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Unsealed,
    Sealed,
    Cache,
}

impl FileKind {
    /// All kinds, in the order they are checked
    pub const ALL: [Self; 3] = [Self::Unsealed, Self::Sealed, Self::Cache];

    const fn bit(self) -> u8 {
        match self {
            Self::Unsealed => 1 << 0,
            Self::Sealed => 1 << 1,
            Self::Cache => 1 << 2,
        }
    }

    /// Fixed string token, used as the on-disk subdirectory and remote key prefix
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Unsealed => "unsealed",
            Self::Sealed => "sealed",
            Self::Cache => "cache",
        }
    }

    /// Parse a kind from its token
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.token() == token)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for FileKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| Error::invalid_argument(format!("unknown file kind: {s}")))
    }
}

/// Set of file kinds (e.g. `Sealed | Cache`)
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileKinds(u8);

impl FileKinds {
    /// Empty set
    pub const NONE: Self = Self(0);
    /// The kinds required for proving
    pub const SEALED_CACHE: Self = Self(FileKind::Sealed.bit() | FileKind::Cache.bit());

    /// Check whether a kind is in the set
    #[must_use]
    pub const fn contains(self, kind: FileKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Add a kind to the set
    pub const fn insert(&mut self, kind: FileKind) {
        self.0 |= kind.bit();
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate kinds in fixed order (unsealed, sealed, cache)
    pub fn iter(self) -> impl Iterator<Item = FileKind> {
        FileKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl From<FileKind> for FileKinds {
    fn from(kind: FileKind) -> Self {
        Self(kind.bit())
    }
}

impl FromIterator<FileKind> for FileKinds {
    fn from_iter<I: IntoIterator<Item = FileKind>>(iter: I) -> Self {
        let mut set = Self::NONE;
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl BitOr for FileKind {
    type Output = FileKinds;

    fn bitor(self, rhs: Self) -> FileKinds {
        FileKinds(self.bit() | rhs.bit())
    }
}

impl BitOr<FileKind> for FileKinds {
    type Output = Self;

    fn bitor(self, rhs: FileKind) -> Self {
        Self(self.0 | rhs.bit())
    }
}

impl BitOr for FileKinds {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign<FileKind> for FileKinds {
    fn bitor_assign(&mut self, rhs: FileKind) {
        self.insert(rhs);
    }
}

impl fmt::Debug for FileKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileKinds({self})")
    }
}

impl fmt::Display for FileKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let tokens: Vec<_> = self.iter().map(FileKind::token).collect();
        f.write_str(&tokens.join("|"))
    }
}

/// Sector size in bytes
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
)]
pub struct SectorSize(pub u64);

impl SectorSize {
    pub const KIB_2: Self = Self(2 << 10);
    pub const MIB_8: Self = Self(8 << 20);
    pub const MIB_512: Self = Self(512 << 20);
    pub const GIB_32: Self = Self(32 << 30);
    pub const GIB_64: Self = Self(64 << 30);

    /// Size classes with a known cache layout
    pub const KNOWN: [Self; 5] = [
        Self::KIB_2,
        Self::MIB_8,
        Self::MIB_512,
        Self::GIB_32,
        Self::GIB_64,
    ];

    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_known(self) -> bool {
        Self::KNOWN.contains(&self)
    }

    /// Number of `tree-r-last` shards in the cache directory, if known
    #[must_use]
    pub const fn shard_count(self) -> Option<usize> {
        match self.0 {
            x if x == Self::KIB_2.0 || x == Self::MIB_8.0 || x == Self::MIB_512.0 => Some(1),
            x if x == Self::GIB_32.0 => Some(8),
            x if x == Self::GIB_64.0 => Some(16),
            _ => None,
        }
    }
}

impl fmt::Display for SectorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
        let mut value = self.0;
        let mut unit = 0;
        while value >= 1024 && value % 1024 == 0 && unit < UNITS.len() - 1 {
            value /= 1024;
            unit += 1;
        }
        write!(f, "{value}{}", UNITS[unit])
    }
}

/// Seal proof type a sector was sealed with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisteredSealProof {
    StackedDrg2KiBV1,
    StackedDrg8MiBV1,
    StackedDrg512MiBV1,
    StackedDrg32GiBV1,
    StackedDrg64GiBV1,
    StackedDrg2KiBV1_1,
    StackedDrg8MiBV1_1,
    StackedDrg512MiBV1_1,
    StackedDrg32GiBV1_1,
    StackedDrg64GiBV1_1,
}

impl RegisteredSealProof {
    /// Sector size sealed by this proof
    #[must_use]
    pub const fn sector_size(self) -> SectorSize {
        match self {
            Self::StackedDrg2KiBV1 | Self::StackedDrg2KiBV1_1 => SectorSize::KIB_2,
            Self::StackedDrg8MiBV1 | Self::StackedDrg8MiBV1_1 => SectorSize::MIB_8,
            Self::StackedDrg512MiBV1 | Self::StackedDrg512MiBV1_1 => SectorSize::MIB_512,
            Self::StackedDrg32GiBV1 | Self::StackedDrg32GiBV1_1 => SectorSize::GIB_32,
            Self::StackedDrg64GiBV1 | Self::StackedDrg64GiBV1_1 => SectorSize::GIB_64,
        }
    }

    /// Window PoSt proof type used to prove sectors sealed with this proof
    #[must_use]
    pub const fn registered_window_post_proof(self) -> RegisteredPoStProof {
        match self {
            Self::StackedDrg2KiBV1 | Self::StackedDrg2KiBV1_1 => {
                RegisteredPoStProof::StackedDrgWindow2KiBV1
            }
            Self::StackedDrg8MiBV1 | Self::StackedDrg8MiBV1_1 => {
                RegisteredPoStProof::StackedDrgWindow8MiBV1
            }
            Self::StackedDrg512MiBV1 | Self::StackedDrg512MiBV1_1 => {
                RegisteredPoStProof::StackedDrgWindow512MiBV1
            }
            Self::StackedDrg32GiBV1 | Self::StackedDrg32GiBV1_1 => {
                RegisteredPoStProof::StackedDrgWindow32GiBV1
            }
            Self::StackedDrg64GiBV1 | Self::StackedDrg64GiBV1_1 => {
                RegisteredPoStProof::StackedDrgWindow64GiBV1
            }
        }
    }
}

impl TryFrom<i64> for RegisteredSealProof {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::StackedDrg2KiBV1,
            1 => Self::StackedDrg8MiBV1,
            2 => Self::StackedDrg512MiBV1,
            3 => Self::StackedDrg32GiBV1,
            4 => Self::StackedDrg64GiBV1,
            5 => Self::StackedDrg2KiBV1_1,
            6 => Self::StackedDrg8MiBV1_1,
            7 => Self::StackedDrg512MiBV1_1,
            8 => Self::StackedDrg32GiBV1_1,
            9 => Self::StackedDrg64GiBV1_1,
            other => return Err(Error::InvalidProofType(format!("seal proof {other}"))),
        })
    }
}

/// Proof-of-spacetime proof type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisteredPoStProof {
    StackedDrgWinning2KiBV1,
    StackedDrgWinning8MiBV1,
    StackedDrgWinning512MiBV1,
    StackedDrgWinning32GiBV1,
    StackedDrgWinning64GiBV1,
    StackedDrgWindow2KiBV1,
    StackedDrgWindow8MiBV1,
    StackedDrgWindow512MiBV1,
    StackedDrgWindow32GiBV1,
    StackedDrgWindow64GiBV1,
}

impl RegisteredPoStProof {
    /// Sector size proven by this proof
    #[must_use]
    pub const fn sector_size(self) -> SectorSize {
        match self {
            Self::StackedDrgWinning2KiBV1 | Self::StackedDrgWindow2KiBV1 => SectorSize::KIB_2,
            Self::StackedDrgWinning8MiBV1 | Self::StackedDrgWindow8MiBV1 => SectorSize::MIB_8,
            Self::StackedDrgWinning512MiBV1 | Self::StackedDrgWindow512MiBV1 => {
                SectorSize::MIB_512
            }
            Self::StackedDrgWinning32GiBV1 | Self::StackedDrgWindow32GiBV1 => SectorSize::GIB_32,
            Self::StackedDrgWinning64GiBV1 | Self::StackedDrgWindow64GiBV1 => SectorSize::GIB_64,
        }
    }

    #[must_use]
    pub const fn is_window(self) -> bool {
        matches!(
            self,
            Self::StackedDrgWindow2KiBV1
                | Self::StackedDrgWindow8MiBV1
                | Self::StackedDrgWindow512MiBV1
                | Self::StackedDrgWindow32GiBV1
                | Self::StackedDrgWindow64GiBV1
        )
    }
}

impl TryFrom<i64> for RegisteredPoStProof {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::StackedDrgWinning2KiBV1,
            1 => Self::StackedDrgWinning8MiBV1,
            2 => Self::StackedDrgWinning512MiBV1,
            3 => Self::StackedDrgWinning32GiBV1,
            4 => Self::StackedDrgWinning64GiBV1,
            5 => Self::StackedDrgWindow2KiBV1,
            6 => Self::StackedDrgWindow8MiBV1,
            7 => Self::StackedDrgWindow512MiBV1,
            8 => Self::StackedDrgWindow32GiBV1,
            9 => Self::StackedDrgWindow64GiBV1,
            other => return Err(Error::InvalidProofType(format!("PoSt proof {other}"))),
        })
    }
}

/// Expected byte length of a sector file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExpectedSize {
    /// File must be exactly this many bytes
    Exact(u64),
    /// Only existence is checked
    Unconstrained,
}

/// Connection details of an S3-compatible remote store
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteStoreInfo {
    /// Endpoint (`host:port` or full URL)
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Base bucket name
    pub bucket: String,
    /// Namespace appended to the base name
    pub namespace: String,
    /// Region used for request signing
    #[serde(default = "default_region")]
    pub region: String,
    /// Use HTTPS when the endpoint has no scheme
    #[serde(default)]
    pub use_tls: bool,
}

fn default_region() -> String {
    "us-west-2".to_string()
}

impl RemoteStoreInfo {
    /// Bucket holding cache/tree artifacts
    #[must_use]
    pub fn proof_bucket(&self) -> String {
        format!("{}-{}-proof", self.bucket, self.namespace)
    }

    /// Bucket holding sealed/unsealed payloads
    #[must_use]
    pub fn data_bucket(&self) -> String {
        format!("{}-{}-data", self.bucket, self.namespace)
    }

    #[must_use]
    pub fn bucket_set(&self) -> BucketSet {
        BucketSet {
            proof: self.proof_bucket(),
            data: self.data_bucket(),
        }
    }

    /// Endpoint as a base URL, adding a scheme when missing
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else if self.use_tls {
            format!("https://{}", self.endpoint.trim_end_matches('/'))
        } else {
            format!("http://{}", self.endpoint.trim_end_matches('/'))
        }
    }
}

impl fmt::Debug for RemoteStoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStoreInfo")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("namespace", &self.namespace)
            .field("region", &self.region)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// The pair of buckets owned by one remote backend
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketSet {
    pub proof: String,
    pub data: String,
}

impl BucketSet {
    /// Bucket that stores files of the given kind
    #[must_use]
    pub fn for_kind(&self, kind: FileKind) -> &str {
        match kind {
            FileKind::Cache => &self.proof,
            FileKind::Sealed | FileKind::Unsealed => &self.data,
        }
    }
}

/// Location of one sector file kind inside a remote store
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteLocation {
    pub info: RemoteStoreInfo,
    pub kind: FileKind,
    pub sector_name: String,
}

impl RemoteLocation {
    /// Key prefix for this kind (`cache`, `sealed`, `unsealed`)
    #[must_use]
    pub const fn key_prefix(&self) -> &'static str {
        self.kind.token()
    }

    /// Bucket this kind lives in
    #[must_use]
    pub fn bucket(&self) -> String {
        self.info.bucket_set().for_kind(self.kind).to_string()
    }

    /// Object name relative to the key prefix, optionally under an entry
    #[must_use]
    pub fn object_name(&self, entry: Option<&str>) -> String {
        match entry {
            Some(entry) => format!("{}/{}", self.sector_name, entry),
            None => self.sector_name.clone(),
        }
    }
}

/// Where one kind of a sector's files physically lives
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    /// Path on a local filesystem
    Local { path: PathBuf },
    /// Object(s) in an S3-compatible store
    Remote(RemoteLocation),
}

impl StorageLocation {
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local { path } => Some(path),
            Self::Remote(_) => None,
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::Remote(loc) => write!(
                f,
                "s3://{}/{}/{}",
                loc.bucket(),
                loc.key_prefix(),
                loc.sector_name
            ),
        }
    }
}

/// Sectors that are currently unprovable, with the reason for each
///
/// Absence of a sector means it passed every check performed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultReport(HashMap<SectorId, String>);

impl FaultReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fault, replacing any earlier reason for the sector
    pub fn insert(&mut self, sector: SectorId, reason: impl Into<String>) {
        self.0.insert(sector, reason.into());
    }

    #[must_use]
    pub fn get(&self, sector: &SectorId) -> Option<&str> {
        self.0.get(sector).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, sector: &SectorId) -> bool {
        self.0.contains_key(sector)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, SectorId, String> {
        self.0.iter()
    }

    /// Faulty sector IDs in ascending order
    #[must_use]
    pub fn sorted_sectors(&self) -> Vec<SectorId> {
        let mut ids: Vec<_> = self.0.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl IntoIterator for FaultReport {
    type Item = (SectorId, String);
    type IntoIter = hash_map::IntoIter<SectorId, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Serialize for FaultReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort_unstable_by_key(|(id, _)| **id);
        serializer.collect_map(entries.into_iter().map(|(id, reason)| (id.to_string(), reason)))
    }
}

impl<'de> Deserialize<'de> for FaultReport {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HashMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(id, reason)| Ok((id.parse().map_err(de::Error::custom)?, reason)))
            .collect::<Result<_, D::Error>>()
            .map(Self)
    }
}
