//! Pool lifecycle and metrics on top of `zpool`.

use crate::engine::{tokens, ZfsEngine};
use crate::parse;
use log::{info, warn};
use vstore_core::error::{StoreError, StoreResult};
use vstore_core::executor::Executor;
use vstore_core::model::{Zpool, ZpoolStatus};
use vstore_core::props::{create_args, Properties};

impl<E: Executor> ZfsEngine<E> {
    /// Every imported pool with its full property set.
    pub fn list_zpools(&self) -> StoreResult<Vec<Zpool>> {
        self.pool_names()?
            .iter()
            .map(|name| self.get_zpool(name))
            .collect()
    }

    /// Pool `name` from `zpool get -H -p all`; `PoolNotFound` when absent.
    pub fn get_zpool(&self, name: &str) -> StoreResult<Zpool> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidRequest("pool name is empty".into()));
        }
        let mut argv = tokens(["get", "-H", "-p", "all"]);
        argv.push(name.to_string());
        let out = self.zpool(&argv)?;
        let props = parse::pool_properties(&out.stdout, name)
            .map_err(|_| StoreError::PoolNotFound(name.to_string()))?;
        parse::zpool_from_properties(name, props)
    }

    /// First pool whose guid is `guid`.
    pub fn get_zpool_by_guid(&self, guid: &str) -> StoreResult<Zpool> {
        self.list_zpools()?
            .into_iter()
            .find(|pool| pool.guid == guid)
            .ok_or_else(|| StoreError::PoolNotFound(guid.to_string()))
    }

    /// `zpool create [-o k=v]... <name> <vdev spec...>`, then the new pool.
    pub fn create_zpool(
        &self,
        name: &str,
        props: &Properties,
        args: &[String],
    ) -> StoreResult<Zpool> {
        let mut argv = tokens(["create"]);
        argv.extend(create_args(props));
        argv.push(name.to_string());
        argv.extend(args.iter().cloned());
        self.zpool(&argv)
            .map_err(|err| err.context(format!("failed to create pool {name}")))?;
        info!("created pool {}", name);
        self.get_zpool(name)
    }

    /// Destroy `name` only after confirming it appears in the pool list.
    pub fn destroy_pool(&self, name: &str) -> StoreResult<()> {
        let _guard = self.lock_pools();
        let names = self.pool_names()?;
        let pool = names
            .iter()
            .find(|candidate| candidate.as_str() == name)
            .ok_or_else(|| StoreError::PoolNotFound(name.to_string()))?;

        let mut argv = tokens(["destroy"]);
        argv.push(pool.clone());
        self.zpool(&argv)
            .map_err(|err| err.context(format!("failed to destroy pool {name}")))?;
        warn!("destroyed pool {}", name);
        Ok(())
    }

    /// Swap `old_device` for `new_device`; resilvering continues in the background.
    pub fn replace_in_pool(
        &self,
        pool: &str,
        old_device: &str,
        new_device: &str,
    ) -> StoreResult<()> {
        let context =
            || format!("failed to replace device in pool {pool}: {old_device} -> {new_device}");
        let resolved = self.get_zpool(pool).map_err(|err| err.context(context()))?;
        let mut argv = tokens(["replace"]);
        argv.push(resolved.name);
        argv.push(old_device.to_string());
        argv.push(new_device.to_string());
        self.zpool(&argv).map_err(|err| err.context(context()))?;
        info!("replacing {} with {} in pool {}", old_device, new_device, pool);
        Ok(())
    }

    /// Start a scrub on an existing pool.
    pub fn scrub_pool(&self, pool: &str) -> StoreResult<()> {
        let resolved = self
            .get_zpool(pool)
            .map_err(|err| err.context(format!("failed to get pool {pool}")))?;
        let mut argv = tokens(["scrub"]);
        argv.push(resolved.name);
        self.zpool(&argv)
            .map_err(|err| err.context(format!("failed to scrub pool {pool}")))?;
        info!("scrub started on pool {}", pool);
        Ok(())
    }

    /// Parsed `zpool status -p` for one pool.
    pub fn get_zpool_status(&self, pool: &str) -> StoreResult<ZpoolStatus> {
        let resolved = self
            .get_zpool(pool)
            .map_err(|err| err.context(format!("failed to get pool {pool}")))?;
        let mut argv = tokens(["status", "-p"]);
        argv.push(resolved.name);
        self.zpool(&argv)
            .and_then(|out| parse::zpool_status(&out.stdout))
            .map_err(|err| err.context(format!("failed to get status of pool {pool}")))
    }

    /// `zpool set property=value pool`.
    pub fn set_zpool_property(&self, pool: &str, property: &str, value: &str) -> StoreResult<()> {
        if property.is_empty() || property.contains('=') {
            return Err(StoreError::InvalidRequest(format!(
                "invalid pool property name `{property}`"
            )));
        }
        let mut argv = tokens(["set"]);
        argv.push(format!("{property}={value}"));
        argv.push(pool.to_string());
        self.zpool(&argv)
            .map_err(|err| err.context(format!("failed to set {property} on pool {pool}")))?;
        info!("set {}={} on pool {}", property, value, pool);
        Ok(())
    }

    /// One-second latency sample for `pool`, in milliseconds.
    pub fn get_pool_io_delay(&self, pool: &str) -> StoreResult<f64> {
        let mut argv = tokens(["iostat", "-H", "-p", "-l", "-y"]);
        argv.push(pool.to_string());
        argv.push("1".into());
        argv.push("1".into());
        let out = self.zpool(&argv)?;
        parse::pool_io_delay(&out.stdout, pool)
    }

    /// Mean latency across every pool; `0.0` when there are none.
    pub fn get_total_io_delay(&self) -> StoreResult<f64> {
        let names = self.pool_names()?;
        if names.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for name in &names {
            total += self.get_pool_io_delay(name)?;
        }
        Ok(total / names.len() as f64)
    }

    fn pool_names(&self) -> StoreResult<Vec<String>> {
        let out = self.zpool(&tokens(["list", "-H", "-o", "name"]))?;
        Ok(parse::pool_names(&out.stdout))
    }
}
