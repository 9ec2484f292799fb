use crate::error::StoreResult;
use crate::model::{
    Dataset, DatasetKind, DestroyFlags, InodeChange, ListKind, Zpool, ZpoolStatus,
};
use crate::props::Properties;
use std::io::Read;

/// Dataset and pool lifecycle operations over a copy-on-write store.
///
/// Every read goes to the store; nothing is cached between calls. Operations
/// on the same entity are not serialized against each other, so callers that
/// need that must lock by name themselves.
pub trait StorageEngine: Send + Sync {
    fn list(&self, kind: ListKind, filter: &str) -> StoreResult<Vec<Dataset>>;

    fn datasets(&self, filter: &str) -> StoreResult<Vec<Dataset>> {
        self.list(ListKind::All, filter)
    }

    fn filesystems(&self, filter: &str) -> StoreResult<Vec<Dataset>> {
        self.list(ListKind::Only(DatasetKind::Filesystem), filter)
    }

    fn volumes(&self, filter: &str) -> StoreResult<Vec<Dataset>> {
        self.list(ListKind::Only(DatasetKind::Volume), filter)
    }

    fn snapshots(&self, filter: &str) -> StoreResult<Vec<Dataset>> {
        self.list(ListKind::Only(DatasetKind::Snapshot), filter)
    }

    fn get_dataset(&self, name: &str) -> StoreResult<Dataset>;

    fn create_filesystem(&self, name: &str, props: &Properties) -> StoreResult<Dataset>;

    fn create_volume(&self, name: &str, size: u64, props: &Properties) -> StoreResult<Dataset>;

    fn edit_filesystem(&self, name: &str, props: &Properties) -> StoreResult<()>;

    fn edit_volume(&self, name: &str, props: &Properties) -> StoreResult<()>;

    fn set_properties(&self, dataset: &Dataset, props: &Properties) -> StoreResult<()>;

    fn receive_snapshot(
        &self,
        input: &mut (dyn Read + Send),
        name: &str,
        force: bool,
    ) -> StoreResult<Dataset>;

    fn snapshot(&self, dataset: &Dataset, snapshot: &str, recursive: bool)
        -> StoreResult<Dataset>;

    fn destroy(&self, dataset: &Dataset, flags: DestroyFlags) -> StoreResult<()>;

    fn diff(&self, snapshot: &Dataset, other: Option<&Dataset>) -> StoreResult<Vec<InodeChange>>;

    fn list_zpools(&self) -> StoreResult<Vec<Zpool>>;

    fn get_zpool(&self, name: &str) -> StoreResult<Zpool>;

    fn get_zpool_by_guid(&self, guid: &str) -> StoreResult<Zpool>;

    fn create_zpool(&self, name: &str, props: &Properties, args: &[String]) -> StoreResult<Zpool>;

    fn destroy_pool(&self, name: &str) -> StoreResult<()>;

    fn replace_in_pool(&self, pool: &str, old_device: &str, new_device: &str) -> StoreResult<()>;

    fn scrub_pool(&self, pool: &str) -> StoreResult<()>;

    fn get_zpool_status(&self, pool: &str) -> StoreResult<ZpoolStatus>;

    fn set_zpool_property(&self, pool: &str, property: &str, value: &str) -> StoreResult<()>;

    /// Mean total wait of one pool, in milliseconds.
    fn get_pool_io_delay(&self, pool: &str) -> StoreResult<f64>;

    /// Mean of `get_pool_io_delay` over every pool; 0.0 when there are none.
    fn get_total_io_delay(&self) -> StoreResult<f64>;
}
