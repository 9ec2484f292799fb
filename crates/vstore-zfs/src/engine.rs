use crate::system::SystemExecutor;
use log::debug;
use std::io::Read;
use std::sync::{Mutex, MutexGuard};
use vstore_core::config::StoreConfig;
use vstore_core::engine::StorageEngine;
use vstore_core::error::StoreResult;
use vstore_core::executor::{Executor, Output, Tool};
use vstore_core::keys::KeyStore;
use vstore_core::model::{Dataset, DestroyFlags, InodeChange, ListKind, Zpool, ZpoolStatus};
use vstore_core::props::Properties;

/// Owned argument vector from fixed tokens.
pub(crate) fn tokens<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(|s| s.to_string()).collect()
}

/// `StorageEngine` that drives `zfs`/`zpool` through an [`Executor`].
///
/// Dataset operations live in `datasets.rs`, pool operations in `pools.rs`.
pub struct ZfsEngine<E: Executor = SystemExecutor> {
    executor: E,
    keys: KeyStore,
    // Serializes destroy_pool's list-then-destroy sequence.
    pool_guard: Mutex<()>,
}

impl ZfsEngine<SystemExecutor> {
    /// Engine over the host binaries named (or discovered) by `config`.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let executor = SystemExecutor::from_config(config)?;
        Ok(Self::new(executor, KeyStore::new(config.key_directory())))
    }
}

impl<E: Executor> ZfsEngine<E> {
    /// Engine over any executor, writing key files into `keys`.
    pub fn new(executor: E, keys: KeyStore) -> Self {
        Self {
            executor,
            keys,
            pool_guard: Mutex::new(()),
        }
    }

    /// Underlying executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Key store used for encrypted creates.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub(crate) fn zfs(&self, args: &[String]) -> StoreResult<Output> {
        self.exec(Tool::Zfs, args, None)
    }

    pub(crate) fn zfs_with_input(
        &self,
        args: &[String],
        input: &mut (dyn Read + Send),
    ) -> StoreResult<Output> {
        self.exec(Tool::Zfs, args, Some(input))
    }

    pub(crate) fn zpool(&self, args: &[String]) -> StoreResult<Output> {
        self.exec(Tool::Zpool, args, None)
    }

    pub(crate) fn lock_pools(&self) -> MutexGuard<'_, ()> {
        // The guard protects no data, so a poisoned lock is still usable.
        self.pool_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn exec(
        &self,
        tool: Tool,
        args: &[String],
        input: Option<&mut (dyn Read + Send)>,
    ) -> StoreResult<Output> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!("{} {}", tool, argv.join(" "));
        self.executor.run(tool, &argv, input)
    }
}

impl<E: Executor> StorageEngine for ZfsEngine<E> {
    fn list(&self, kind: ListKind, filter: &str) -> StoreResult<Vec<Dataset>> {
        Self::list(self, kind, filter)
    }

    fn get_dataset(&self, name: &str) -> StoreResult<Dataset> {
        Self::get_dataset(self, name)
    }

    fn create_filesystem(&self, name: &str, props: &Properties) -> StoreResult<Dataset> {
        Self::create_filesystem(self, name, props)
    }

    fn create_volume(&self, name: &str, size: u64, props: &Properties) -> StoreResult<Dataset> {
        Self::create_volume(self, name, size, props)
    }

    fn edit_filesystem(&self, name: &str, props: &Properties) -> StoreResult<()> {
        Self::edit_filesystem(self, name, props)
    }

    fn edit_volume(&self, name: &str, props: &Properties) -> StoreResult<()> {
        Self::edit_volume(self, name, props)
    }

    fn set_properties(&self, dataset: &Dataset, props: &Properties) -> StoreResult<()> {
        Self::set_properties(self, dataset, props)
    }

    fn receive_snapshot(
        &self,
        input: &mut (dyn Read + Send),
        name: &str,
        force: bool,
    ) -> StoreResult<Dataset> {
        Self::receive_snapshot(self, input, name, force)
    }

    fn snapshot(
        &self,
        dataset: &Dataset,
        snapshot: &str,
        recursive: bool,
    ) -> StoreResult<Dataset> {
        Self::snapshot(self, dataset, snapshot, recursive)
    }

    fn destroy(&self, dataset: &Dataset, flags: DestroyFlags) -> StoreResult<()> {
        Self::destroy(self, dataset, flags)
    }

    fn diff(&self, snapshot: &Dataset, other: Option<&Dataset>) -> StoreResult<Vec<InodeChange>> {
        Self::diff(self, snapshot, other)
    }

    fn list_zpools(&self) -> StoreResult<Vec<Zpool>> {
        Self::list_zpools(self)
    }

    fn get_zpool(&self, name: &str) -> StoreResult<Zpool> {
        Self::get_zpool(self, name)
    }

    fn get_zpool_by_guid(&self, guid: &str) -> StoreResult<Zpool> {
        Self::get_zpool_by_guid(self, guid)
    }

    fn create_zpool(&self, name: &str, props: &Properties, args: &[String]) -> StoreResult<Zpool> {
        Self::create_zpool(self, name, props, args)
    }

    fn destroy_pool(&self, name: &str) -> StoreResult<()> {
        Self::destroy_pool(self, name)
    }

    fn replace_in_pool(&self, pool: &str, old_device: &str, new_device: &str) -> StoreResult<()> {
        Self::replace_in_pool(self, pool, old_device, new_device)
    }

    fn scrub_pool(&self, pool: &str) -> StoreResult<()> {
        Self::scrub_pool(self, pool)
    }

    fn get_zpool_status(&self, pool: &str) -> StoreResult<ZpoolStatus> {
        Self::get_zpool_status(self, pool)
    }

    fn set_zpool_property(&self, pool: &str, property: &str, value: &str) -> StoreResult<()> {
        Self::set_zpool_property(self, pool, property, value)
    }

    fn get_pool_io_delay(&self, pool: &str) -> StoreResult<f64> {
        Self::get_pool_io_delay(self, pool)
    }

    fn get_total_io_delay(&self) -> StoreResult<f64> {
        Self::get_total_io_delay(self)
    }
}
