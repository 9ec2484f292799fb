//! Process-wide default engine behind free functions.
//!
//! The slot is filled once at startup and is immutable afterwards. Code that
//! needs a different engine (tests included) should hold its own
//! `StorageEngine` instead of swapping this one.

use crate::engine::StorageEngine;
use crate::error::{StoreError, StoreResult};
use crate::model::{Dataset, Zpool, ZpoolStatus};
use crate::props::Properties;
use log::info;
use std::io::Read;
use std::sync::OnceLock;

static ENGINE: OnceLock<Box<dyn StorageEngine>> = OnceLock::new();

/// Install the default engine. Only the first call succeeds.
pub fn install(engine: Box<dyn StorageEngine>) -> StoreResult<()> {
    ENGINE
        .set(engine)
        .map_err(|_| StoreError::InvalidConfig("default storage engine already installed".into()))?;
    info!("default storage engine installed");
    Ok(())
}

pub fn is_installed() -> bool {
    ENGINE.get().is_some()
}

/// The installed engine.
pub fn engine() -> StoreResult<&'static dyn StorageEngine> {
    ENGINE
        .get()
        .map(|e| e.as_ref())
        .ok_or_else(|| StoreError::InvalidConfig("default storage engine not installed".into()))
}

pub fn datasets(filter: &str) -> StoreResult<Vec<Dataset>> {
    engine()?.datasets(filter)
}

pub fn snapshots(filter: &str) -> StoreResult<Vec<Dataset>> {
    engine()?.snapshots(filter)
}

pub fn get_dataset(name: &str) -> StoreResult<Dataset> {
    engine()?.get_dataset(name)
}

pub fn create_filesystem(name: &str, props: &Properties) -> StoreResult<Dataset> {
    engine()?.create_filesystem(name, props)
}

pub fn create_volume(name: &str, size: u64, props: &Properties) -> StoreResult<Dataset> {
    engine()?.create_volume(name, size, props)
}

pub fn receive_snapshot(
    input: &mut (dyn Read + Send),
    name: &str,
    force: bool,
) -> StoreResult<Dataset> {
    engine()?.receive_snapshot(input, name, force)
}

pub fn list_zpools() -> StoreResult<Vec<Zpool>> {
    engine()?.list_zpools()
}

pub fn get_zpool(name: &str) -> StoreResult<Zpool> {
    engine()?.get_zpool(name)
}

pub fn create_zpool(name: &str, props: &Properties, args: &[String]) -> StoreResult<Zpool> {
    engine()?.create_zpool(name, props, args)
}

pub fn destroy_pool(name: &str) -> StoreResult<()> {
    engine()?.destroy_pool(name)
}

pub fn replace_in_pool(pool: &str, old_device: &str, new_device: &str) -> StoreResult<()> {
    engine()?.replace_in_pool(pool, old_device, new_device)
}

pub fn scrub_pool(pool: &str) -> StoreResult<()> {
    engine()?.scrub_pool(pool)
}

pub fn get_zpool_status(pool: &str) -> StoreResult<ZpoolStatus> {
    engine()?.get_zpool_status(pool)
}

pub fn set_zpool_property(pool: &str, property: &str, value: &str) -> StoreResult<()> {
    engine()?.set_zpool_property(pool, property, value)
}

pub fn get_pool_io_delay(pool: &str) -> StoreResult<f64> {
    engine()?.get_pool_io_delay(pool)
}

pub fn get_total_io_delay() -> StoreResult<f64> {
    engine()?.get_total_io_delay()
}
