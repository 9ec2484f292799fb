//! `zfs`/`zpool` backed implementation of the vstore storage engine. The
//! engine itself lives in `engine`, with dataset and pool operations split
//! across `datasets` and `pools`; `command`, `system`, and `parse` cover
//! process execution and output handling.

mod command;
mod datasets;
mod engine;
mod parse;
mod pools;
mod system;

#[cfg(test)]
mod fake;

pub use command::CommandRunner;
pub use engine::ZfsEngine;
pub use system::{SystemExecutor, DEFAULT_ZFS_PATHS, DEFAULT_ZPOOL_PATHS};
