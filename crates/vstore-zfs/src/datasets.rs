//! Filesystem, volume, and snapshot lifecycle on top of `zfs`.

use crate::engine::{tokens, ZfsEngine};
use crate::parse;
use log::info;
use std::io::Read;
use std::path::PathBuf;
use vstore_core::error::{StoreError, StoreResult};
use vstore_core::executor::Executor;
use vstore_core::model::{Dataset, DatasetKind, DestroyFlags, InodeChange, ListKind};
use vstore_core::props::{
    create_args, normalize_for_create, normalize_for_edit, set_args, Properties,
};

/// Tab-separated `name property value` triples with exact numbers.
const GET_ALL: [&str; 5] = ["get", "-H", "-p", "-o", "name,property,value"];

fn validate_name(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidRequest("dataset name is empty".into()));
    }
    Ok(())
}

impl<E: Executor> ZfsEngine<E> {
    /// Datasets of `kind`, optionally narrowed to `filter` and its descendants.
    pub fn list(&self, kind: ListKind, filter: &str) -> StoreResult<Vec<Dataset>> {
        let mut argv = tokens(GET_ALL);
        argv.extend(tokens(["-t", kind.type_filter()]));
        if filter.is_empty() {
            argv.push("all".into());
        } else {
            argv.extend(tokens(["-r", "all", filter]));
        }
        let out = self.zfs(&argv)?;
        parse::datasets_from_get(&out.stdout)
    }

    /// Current properties of exactly `name`.
    pub fn get_dataset(&self, name: &str) -> StoreResult<Dataset> {
        validate_name(name)?;
        let mut argv = tokens(GET_ALL);
        argv.push("all".into());
        argv.push(name.to_string());
        let out = self.zfs(&argv)?;
        parse::datasets_from_get(&out.stdout)?
            .into_iter()
            .find(|ds| ds.name == name)
            .ok_or_else(|| StoreError::DatasetNotFound(name.to_string()))
    }

    /// Create a filesystem; an `encryptionKey` becomes a key file first.
    pub fn create_filesystem(&self, name: &str, props: &Properties) -> StoreResult<Dataset> {
        validate_name(name)?;
        let prepared = normalize_for_create(name, props, DatasetKind::Filesystem, self.keys())?;
        let mut argv = tokens(["create"]);
        argv.extend(create_args(&prepared.properties));
        argv.push(name.to_string());
        self.issue_create(name, &argv, prepared.key_file)
    }

    /// Create a volume of exactly `size` bytes.
    pub fn create_volume(&self, name: &str, size: u64, props: &Properties) -> StoreResult<Dataset> {
        validate_name(name)?;
        if size == 0 {
            return Err(StoreError::InvalidRequest(format!(
                "volume {name} needs a nonzero size"
            )));
        }
        let prepared = normalize_for_create(name, props, DatasetKind::Volume, self.keys())?;
        let mut argv = tokens(["create", "-p", "-V"]);
        argv.push(size.to_string());
        argv.extend(create_args(&prepared.properties));
        argv.push(name.to_string());
        self.issue_create(name, &argv, prepared.key_file)
    }

    fn issue_create(
        &self,
        name: &str,
        argv: &[String],
        key_file: Option<PathBuf>,
    ) -> StoreResult<Dataset> {
        if let Err(err) = self.zfs(argv) {
            if let Some(path) = key_file {
                self.keys().discard(&path);
            }
            return Err(err.context(format!("failed to create {name}")));
        }
        info!("created dataset {}", name);
        self.get_dataset(name)
    }

    pub fn edit_filesystem(&self, name: &str, props: &Properties) -> StoreResult<()> {
        self.edit(name, props)
    }

    pub fn edit_volume(&self, name: &str, props: &Properties) -> StoreResult<()> {
        self.edit(name, props)
    }

    fn edit(&self, name: &str, props: &Properties) -> StoreResult<()> {
        let dataset = self
            .get_dataset(name)
            .map_err(|err| err.context(format!("error_getting_dataset {name}")))?;
        let outgoing = normalize_for_edit(props);
        if outgoing.is_empty() {
            return Err(StoreError::NoPropertiesToEdit {
                dataset: name.to_string(),
            });
        }
        self.set_properties(&dataset, &outgoing)
    }

    /// `zfs set` every pair on `dataset`. Re-fetch afterwards for the new values.
    pub fn set_properties(&self, dataset: &Dataset, props: &Properties) -> StoreResult<()> {
        if props.is_empty() {
            return Err(StoreError::NoPropertiesToEdit {
                dataset: dataset.name.clone(),
            });
        }
        let mut argv = tokens(["set"]);
        argv.extend(set_args(props));
        argv.push(dataset.name.clone());
        self.zfs(&argv)?;
        info!("updated {} properties on {}", props.len(), dataset.name);
        Ok(())
    }

    /// Stream a send stream into `name`; `force` rolls the target back first.
    pub fn receive_snapshot(
        &self,
        input: &mut (dyn Read + Send),
        name: &str,
        force: bool,
    ) -> StoreResult<Dataset> {
        validate_name(name)?;
        let mut argv = tokens(["receive"]);
        if force {
            argv.push("-F".into());
        }
        argv.push(name.to_string());
        self.zfs_with_input(&argv, input).map_err(|err| match err {
            StoreError::PartialStream { reason, .. } => StoreError::PartialStream {
                dataset: name.to_string(),
                reason,
            },
            other => other.context(format!("failed to receive into {name}")),
        })?;
        info!("received stream into {}", name);
        self.get_dataset(name)
    }

    pub fn snapshot(
        &self,
        dataset: &Dataset,
        snapshot: &str,
        recursive: bool,
    ) -> StoreResult<Dataset> {
        if snapshot.is_empty() || snapshot.contains(['@', '/']) {
            return Err(StoreError::InvalidRequest(format!(
                "invalid snapshot name `{snapshot}`"
            )));
        }
        if dataset.kind == DatasetKind::Snapshot {
            return Err(StoreError::InvalidRequest(format!(
                "cannot snapshot snapshot {}",
                dataset.name
            )));
        }
        let full = format!("{}@{}", dataset.name, snapshot);
        let mut argv = tokens(["snapshot"]);
        if recursive {
            argv.push("-r".into());
        }
        argv.push(full.clone());
        self.zfs(&argv)?;
        info!("took snapshot {}", full);
        self.get_dataset(&full)
    }

    /// `zfs destroy` with the switches `flags` selects.
    pub fn destroy(&self, dataset: &Dataset, flags: DestroyFlags) -> StoreResult<()> {
        let mut argv = tokens(["destroy"]);
        argv.extend(flags.to_args().into_iter().map(String::from));
        argv.push(dataset.name.clone());
        self.zfs(&argv)
            .map_err(|err| err.context(format!("failed to destroy {}", dataset.name)))?;
        info!("destroyed dataset {}", dataset.name);
        Ok(())
    }

    /// Inode changes since `snapshot`, up to `other` or the live filesystem.
    pub fn diff(
        &self,
        snapshot: &Dataset,
        other: Option<&Dataset>,
    ) -> StoreResult<Vec<InodeChange>> {
        if snapshot.kind != DatasetKind::Snapshot {
            return Err(StoreError::InvalidRequest(format!(
                "{} is not a snapshot",
                snapshot.name
            )));
        }
        let mut argv = tokens(["diff", "-F", "-H"]);
        argv.push(snapshot.name.clone());
        if let Some(other) = other {
            argv.push(other.name.clone());
        }
        let out = self.zfs(&argv)?;
        parse::inode_changes(&out.stdout)
    }
}
