pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handle;
pub mod keys;
pub mod logging;
pub mod model;
pub mod props;

pub use config::StoreConfig;
pub use engine::StorageEngine;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use executor::{Executor, Output, Tool};
pub use keys::KeyStore;
pub use model::{
    ChangeType, Dataset, DatasetKind, DestroyFlags, DiskSource, InodeChange, InodeType, ListKind,
    PoolHealth, ScanState, VdevStatus, Zpool, ZpoolStatus,
};
pub use props::Properties;
