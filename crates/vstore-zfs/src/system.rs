//! `Executor` backed by the host's `zfs` and `zpool` binaries.

use crate::command::CommandRunner;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use vstore_core::config::StoreConfig;
use vstore_core::error::{StoreError, StoreResult};
use vstore_core::executor::{Executor, Output, Tool};

/// Default locations searched for a `zfs` binary.
pub const DEFAULT_ZFS_PATHS: &[&str] = &[
    "/sbin/zfs",
    "/usr/sbin/zfs",
    "/usr/local/sbin/zfs",
    "/bin/zfs",
];

/// Default locations searched for a `zpool` binary.
pub const DEFAULT_ZPOOL_PATHS: &[&str] = &[
    "/sbin/zpool",
    "/usr/sbin/zpool",
    "/usr/local/sbin/zpool",
    "/bin/zpool",
];

/// Runs store commands on the local host, optionally elevated.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    zfs_runner: CommandRunner,
    zpool_runner: CommandRunner,
}

impl SystemExecutor {
    /// Build from configuration, discovering binaries that are not pinned.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let timeout = config.command_timeout();
        let zfs_runner = match config.zfs_binary_path() {
            Some(path) => Self::runner_with_path(path, timeout)?,
            None => Self::discover_runner("zfs", DEFAULT_ZFS_PATHS, timeout)?,
        };
        let zpool_runner = match config.zpool_binary_path() {
            Some(path) => Self::runner_with_path(path, timeout)?,
            None => Self::discover_runner("zpool", DEFAULT_ZPOOL_PATHS, timeout)?,
        };

        let executor = Self {
            zfs_runner,
            zpool_runner,
        }
        .with_stream_timeout(config.stream_timeout());
        Ok(match config.elevation() {
            Some(helper) => executor.elevated(helper),
            None => executor,
        })
    }

    /// Executor over explicit binary paths; streamed invocations have no deadline.
    pub fn with_paths(
        zfs_path: PathBuf,
        zpool_path: PathBuf,
        timeout: Duration,
    ) -> StoreResult<Self> {
        Ok(Self {
            zfs_runner: Self::runner_with_path(zfs_path, timeout)?,
            zpool_runner: Self::runner_with_path(zpool_path, timeout)?,
        })
    }

    /// Executor over the first binaries found on the default search paths.
    pub fn discover(timeout: Duration) -> StoreResult<Self> {
        Ok(Self {
            zfs_runner: Self::discover_runner("zfs", DEFAULT_ZFS_PATHS, timeout)?,
            zpool_runner: Self::discover_runner("zpool", DEFAULT_ZPOOL_PATHS, timeout)?,
        })
    }

    /// Deadline for invocations fed a stdin stream, such as `zfs receive`.
    pub fn with_stream_timeout(self, timeout: Option<Duration>) -> Self {
        Self {
            zfs_runner: self.zfs_runner.with_stream_timeout(timeout),
            zpool_runner: self.zpool_runner.with_stream_timeout(timeout),
        }
    }

    /// Route both tools through an elevation helper such as `sudo`.
    pub fn elevated(self, helper: PathBuf) -> Self {
        Self {
            zfs_runner: self.zfs_runner.elevated(helper.clone()),
            zpool_runner: self.zpool_runner.elevated(helper),
        }
    }

    fn runner_with_path(path: PathBuf, timeout: Duration) -> StoreResult<CommandRunner> {
        if !path.exists() {
            return Err(StoreError::InvalidConfig(format!(
                "binary not found at {}",
                path.display()
            )));
        }
        Ok(CommandRunner::new(path, timeout))
    }

    fn discover_runner(
        tool: &str,
        candidates: &[&str],
        timeout: Duration,
    ) -> StoreResult<CommandRunner> {
        candidates
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(|p| CommandRunner::new(p.to_path_buf(), timeout))
            .ok_or_else(|| {
                StoreError::InvalidConfig(format!(
                    "unable to locate {tool} binary; tried {:?}",
                    candidates
                ))
            })
    }

    fn runner(&self, tool: Tool) -> &CommandRunner {
        match tool {
            Tool::Zfs => &self.zfs_runner,
            Tool::Zpool => &self.zpool_runner,
        }
    }
}

impl Executor for SystemExecutor {
    fn run(
        &self,
        tool: Tool,
        args: &[&str],
        input: Option<&mut (dyn Read + Send)>,
    ) -> StoreResult<Output> {
        let runner = self.runner(tool);
        let out = runner.run(args, input)?;
        if out.status != 0 {
            return Err(classify_cli_error(&runner.describe(args), args, &out));
        }
        Ok(out)
    }
}

fn quoted_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'([^']+)'").expect("static regex"))
}

/// Map a failed invocation onto the error taxonomy.
pub(crate) fn classify_cli_error(command: &str, args: &[&str], output: &Output) -> StoreError {
    let stderr = output.stderr.trim();
    let stdout = output.stdout.trim();
    let diagnostic = if !stderr.is_empty() { stderr } else { stdout };
    let lower = diagnostic.to_ascii_lowercase();

    // "cannot open 'tank/x': dataset does not exist"
    let subject = || {
        quoted_name()
            .captures(diagnostic)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .or_else(|| args.last().map(|a| a.to_string()))
            .unwrap_or_default()
    };

    if lower.contains("dataset does not exist") {
        return StoreError::DatasetNotFound(subject());
    }
    if lower.contains("no such pool") || lower.contains("pool does not exist") {
        return StoreError::PoolNotFound(subject());
    }

    StoreError::Execution {
        command: command.to_string(),
        status: output.status,
        diagnostic: if diagnostic.is_empty() {
            "no additional output".to_string()
        } else {
            diagnostic.to_string()
        },
    }
}
