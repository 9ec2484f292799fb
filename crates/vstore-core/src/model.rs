//! Typed entities handed back to callers: datasets, pools, pool status, diff
//! records, destroy modes, and the disk backing a VM can be pointed at.

use crate::error::{StoreError, StoreResult};
use crate::props::Properties;
use serde::Serialize;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of a concrete dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Filesystem,
    Snapshot,
    Volume,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Filesystem => "filesystem",
            DatasetKind::Snapshot => "snapshot",
            DatasetKind::Volume => "volume",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "filesystem" => Ok(DatasetKind::Filesystem),
            "snapshot" => Ok(DatasetKind::Snapshot),
            "volume" => Ok(DatasetKind::Volume),
            other => Err(StoreError::Parse(format!("unknown dataset type `{other}`"))),
        }
    }
}

/// Type selector for listings; `All` spans every `DatasetKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    All,
    Only(DatasetKind),
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::All => "all",
            ListKind::Only(kind) => kind.as_str(),
        }
    }

    /// Value for `zfs -t`. `All` names the modelled types so bookmarks stay out.
    pub fn type_filter(&self) -> &'static str {
        match self {
            ListKind::All => "filesystem,volume,snapshot",
            ListKind::Only(kind) => kind.as_str(),
        }
    }
}

impl From<DatasetKind> for ListKind {
    fn from(kind: DatasetKind) -> Self {
        ListKind::Only(kind)
    }
}

impl FromStr for ListKind {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        if s == "all" {
            return Ok(ListKind::All);
        }
        s.parse::<DatasetKind>()
            .map(ListKind::Only)
            .map_err(|_| StoreError::InvalidRequest(format!("unknown dataset type `{s}`")))
    }
}

/// Filesystem, volume, or snapshot as last reported by the store.
///
/// Values are snapshots of ground truth: after a mutation, fetch the dataset
/// again rather than trusting an older copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dataset {
    pub name: String,
    pub kind: DatasetKind,
    pub properties: Properties,
}

impl Dataset {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Pool that owns this dataset by namespace prefix.
    pub fn pool(&self) -> &str {
        self.name
            .split(|c| c == '/' || c == '@')
            .next()
            .unwrap_or(&self.name)
    }

    /// Provisioned size of a volume.
    pub fn size_bytes(&self) -> Option<u64> {
        self.numeric("volsize")
    }

    /// Quota, or `None` when no quota is in force.
    pub fn quota_bytes(&self) -> Option<u64> {
        self.numeric("quota").filter(|q| *q > 0)
    }

    pub fn used_bytes(&self) -> Option<u64> {
        self.numeric("used")
    }

    pub fn available_bytes(&self) -> Option<u64> {
        self.numeric("available")
    }

    fn numeric(&self, key: &str) -> Option<u64> {
        self.property(key).and_then(|v| v.parse::<u64>().ok())
    }
}

/// Pool health as printed by `zpool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolHealth {
    Online,
    Degraded,
    Faulted,
    Offline,
    Removed,
    Unavail,
    Suspended,
    #[serde(untagged)]
    Unknown(String),
}

impl PoolHealth {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => PoolHealth::Online,
            "DEGRADED" => PoolHealth::Degraded,
            "FAULTED" => PoolHealth::Faulted,
            "OFFLINE" => PoolHealth::Offline,
            "REMOVED" => PoolHealth::Removed,
            "UNAVAIL" => PoolHealth::Unavail,
            "SUSPENDED" => PoolHealth::Suspended,
            _ => PoolHealth::Unknown(value.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zpool {
    pub name: String,
    pub guid: String,
    pub health: PoolHealth,
    pub properties: Properties,
}

impl Zpool {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.property("size").and_then(|v| v.parse().ok())
    }

    pub fn allocated_bytes(&self) -> Option<u64> {
        self.property("allocated").and_then(|v| v.parse().ok())
    }

    pub fn free_bytes(&self) -> Option<u64> {
        self.property("free").and_then(|v| v.parse().ok())
    }
}

/// Interpretation of the `scan:` line of `zpool status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    None,
    ScrubInProgress,
    ScrubFinished,
    ScrubCanceled,
    ScrubPaused,
    ResilverInProgress,
    ResilverFinished,
    #[serde(untagged)]
    Other(String),
}

/// One row of the device tree under `config:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VdevStatus {
    pub name: String,
    pub state: String,
    pub read_errors: u64,
    pub write_errors: u64,
    pub checksum_errors: u64,
    /// Nesting level; the pool root is 0.
    pub depth: usize,
    /// Trailing annotation such as `(resilvering)`.
    pub note: Option<String>,
}

/// Health and scan state of a pool at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZpoolStatus {
    pub name: String,
    pub state: PoolHealth,
    pub status: Option<String>,
    pub action: Option<String>,
    pub scan: Option<String>,
    pub scan_state: ScanState,
    pub errors: Option<String>,
    pub devices: Vec<VdevStatus>,
}

impl ZpoolStatus {
    pub fn is_healthy(&self) -> bool {
        self.state == PoolHealth::Online
    }

    pub fn scan_in_progress(&self) -> bool {
        matches!(
            self.scan_state,
            ScanState::ScrubInProgress | ScanState::ResilverInProgress
        )
    }
}

/// What happened to an inode between two points in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Removed,
    Created,
    Modified,
    Renamed,
}

impl ChangeType {
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "-" => Some(ChangeType::Removed),
            "+" => Some(ChangeType::Created),
            "M" => Some(ChangeType::Modified),
            "R" => Some(ChangeType::Renamed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InodeType {
    BlockDevice,
    CharacterDevice,
    Directory,
    Door,
    NamedPipe,
    SymbolicLink,
    EventPort,
    Socket,
    File,
}

impl InodeType {
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "B" => Some(InodeType::BlockDevice),
            "C" => Some(InodeType::CharacterDevice),
            "/" => Some(InodeType::Directory),
            ">" => Some(InodeType::Door),
            "|" => Some(InodeType::NamedPipe),
            "@" => Some(InodeType::SymbolicLink),
            "P" => Some(InodeType::EventPort),
            "=" => Some(InodeType::Socket),
            "F" => Some(InodeType::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InodeChange {
    pub change: ChangeType,
    pub kind: InodeType,
    pub path: String,
    pub new_path: Option<String>,
    pub reference_count_change: i64,
}

/// Composable destroy modes. `DEFAULT` alone is a plain, non-recursive destroy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestroyFlags(u8);

impl DestroyFlags {
    pub const DEFAULT: Self = Self(1);
    pub const RECURSIVE: Self = Self(1 << 1);
    pub const RECURSIVE_CLONES: Self = Self(1 << 2);
    pub const DEFER_DELETION: Self = Self(1 << 3);
    pub const FORCE_UMOUNT: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `zfs destroy` switches, in a fixed order.
    pub fn to_args(self) -> Vec<&'static str> {
        let mut args = Vec::new();
        if self.contains(Self::DEFER_DELETION) {
            args.push("-d");
        }
        if self.contains(Self::RECURSIVE) {
            args.push("-r");
        }
        if self.contains(Self::RECURSIVE_CLONES) {
            args.push("-R");
        }
        if self.contains(Self::FORCE_UMOUNT) {
            args.push("-f");
        }
        args
    }
}

impl Default for DestroyFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for DestroyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DestroyFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// What a virtual disk is backed by, resolved from a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DiskSource {
    File { path: PathBuf },
    Volume { pool: String, volume: String },
}

impl DiskSource {
    /// Volumes back a disk directly; filesystems hold `image` under their mountpoint.
    pub fn for_dataset(dataset: &Dataset, image: &str) -> StoreResult<Self> {
        match dataset.kind {
            DatasetKind::Volume => {
                let pool = dataset.pool().to_string();
                let volume = dataset
                    .name
                    .strip_prefix(&format!("{pool}/"))
                    .ok_or_else(|| {
                        StoreError::InvalidRequest(format!(
                            "volume `{}` has no pool prefix",
                            dataset.name
                        ))
                    })?
                    .to_string();
                Ok(DiskSource::Volume { pool, volume })
            }
            DatasetKind::Filesystem => {
                let mountpoint = dataset
                    .property("mountpoint")
                    .filter(|m| m.starts_with('/'))
                    .ok_or_else(|| {
                        StoreError::InvalidRequest(format!(
                            "filesystem `{}` is not mounted",
                            dataset.name
                        ))
                    })?;
                if image.is_empty() || image.contains('/') {
                    return Err(StoreError::InvalidRequest(format!(
                        "invalid disk image name `{image}`"
                    )));
                }
                Ok(DiskSource::File {
                    path: PathBuf::from(mountpoint).join(image),
                })
            }
            DatasetKind::Snapshot => Err(StoreError::InvalidRequest(format!(
                "snapshot `{}` cannot back a disk",
                dataset.name
            ))),
        }
    }
}
