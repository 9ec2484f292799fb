use crate::error::StoreResult;
use std::fmt;
use std::io::Read;

/// Store tooling the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Zfs,
    Zpool,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Zfs => "zfs",
            Tool::Zpool => "zpool",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl Output {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: 0,
        }
    }
}

/// Runs a store tool with discrete argument tokens and an optional stdin stream.
///
/// Implementations must never route arguments through a shell, must turn a
/// nonzero exit into an error, and decide elevation once at construction.
pub trait Executor: Send + Sync {
    fn run(
        &self,
        tool: Tool,
        args: &[&str],
        input: Option<&mut (dyn Read + Send)>,
    ) -> StoreResult<Output>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn run(
        &self,
        tool: Tool,
        args: &[&str],
        input: Option<&mut (dyn Read + Send)>,
    ) -> StoreResult<Output> {
        (**self).run(tool, args, input)
    }
}

impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    fn run(
        &self,
        tool: Tool,
        args: &[&str],
        input: Option<&mut (dyn Read + Send)>,
    ) -> StoreResult<Output> {
        (**self).run(tool, args, input)
    }
}
