use crate::error::{StoreError, StoreResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the `zfs` and `zpool` binaries are located and invoked.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandsCfg {
    #[serde(default)]
    pub zfs_path: Option<String>,

    #[serde(default)]
    pub zpool_path: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Deadline for invocations fed a stdin stream (`zfs receive`). Unset means none.
    #[serde(default)]
    pub stream_timeout_secs: Option<u64>,

    /// Run every invocation through `sudo_path`. Fixed for the life of the process.
    #[serde(default)]
    pub sudo: bool,

    #[serde(default = "default_sudo_path")]
    pub sudo_path: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_sudo_path() -> String {
    "/usr/bin/sudo".to_string()
}

impl Default for CommandsCfg {
    fn default() -> Self {
        Self {
            zfs_path: None,
            zpool_path: None,
            timeout_secs: default_timeout_secs(),
            stream_timeout_secs: None,
            sudo: false,
            sudo_path: default_sudo_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeysCfg {
    #[serde(default = "default_key_directory")]
    pub directory: String,
}

fn default_key_directory() -> String {
    "/etc/zfs/keys".to_string()
}

impl Default for KeysCfg {
    fn default() -> Self {
        Self {
            directory: default_key_directory(),
        }
    }
}

/// On-disk configuration; TOML when the extension says so, YAML otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    #[serde(default)]
    pub commands: CommandsCfg,

    #[serde(default)]
    pub keys: KeysCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl StoreConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();

        let issues = cfg.validate();
        if let Some(first) = issues.into_iter().next() {
            return Err(StoreError::InvalidConfig(first));
        }

        Ok(cfg)
    }

    /// Collect every problem with the configuration instead of stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.commands.timeout_secs == 0 {
            issues.push("commands.timeout_secs must be greater than zero".to_string());
        }
        if self.commands.stream_timeout_secs == Some(0) {
            issues.push(
                "commands.stream_timeout_secs must be greater than zero when set".to_string(),
            );
        }
        if self.commands.sudo && self.commands.sudo_path.trim().is_empty() {
            issues.push("commands.sudo is enabled but commands.sudo_path is empty".to_string());
        }
        if !Path::new(&self.keys.directory).is_absolute() {
            issues.push(format!(
                "keys.directory must be an absolute path (got `{}`)",
                self.keys.directory
            ));
        }
        for (field, value) in [
            ("commands.zfs_path", &self.commands.zfs_path),
            ("commands.zpool_path", &self.commands.zpool_path),
        ] {
            if matches!(value, Some(p) if p.trim().is_empty()) {
                issues.push(format!("{field} is set but empty"));
            }
        }
        issues
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        self.commands.stream_timeout_secs.map(Duration::from_secs)
    }

    pub fn zfs_binary_path(&self) -> Option<PathBuf> {
        self.commands.zfs_path.as_ref().map(PathBuf::from)
    }

    pub fn zpool_binary_path(&self) -> Option<PathBuf> {
        self.commands.zpool_path.as_ref().map(PathBuf::from)
    }

    /// Elevation helper, present only when `sudo` is enabled.
    pub fn elevation(&self) -> Option<PathBuf> {
        self.commands
            .sudo
            .then(|| PathBuf::from(&self.commands.sudo_path))
    }

    pub fn key_directory(&self) -> PathBuf {
        PathBuf::from(&self.keys.directory)
    }
}
