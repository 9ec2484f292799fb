//! Property maps and the argument tokens built from them.
//!
//! `Properties` is ordered, so every token sequence built here is stable for a
//! given logical input. Caller maps are never modified; normalization always
//! works on a copy.

use crate::error::StoreResult;
use crate::keys::{key_properties, KeyStore};
use crate::model::DatasetKind;
use std::collections::BTreeMap;
use std::path::PathBuf;
use zeroize::Zeroizing;

pub type Properties = BTreeMap<String, String>;

/// Caller-only key carrying a raw passphrase. Never forwarded to the store.
pub const ENCRYPTION_KEY: &str = "encryptionKey";
pub const ENCRYPTION: &str = "encryption";
pub const QUOTA: &str = "quota";
/// Structural inputs of volume creation that arrive mixed in with properties.
pub const PARENT: &str = "parent";
pub const SIZE: &str = "size";

/// Outgoing properties for a create, and the key file written on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCreate {
    pub properties: Properties,
    pub key_file: Option<PathBuf>,
}

/// `-o key=value` pairs for `create`.
pub fn create_args(props: &Properties) -> Vec<String> {
    props
        .iter()
        .flat_map(|(k, v)| ["-o".to_string(), format!("{k}={v}")])
        .collect()
}

/// `key=value` tokens for `set`.
pub fn set_args(props: &Properties) -> Vec<String> {
    props.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Empty or zero quotas mean "no quota requested".
pub fn is_unset_quota(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == "0" || value.eq_ignore_ascii_case("0b")
}

/// Build the outgoing property set for creating `name`.
///
/// A non-empty `encryptionKey` on a dataset whose `encryption` is not `off` is
/// persisted through `keys` and replaced by `keylocation`/`keyformat`.
pub fn normalize_for_create(
    name: &str,
    props: &Properties,
    kind: DatasetKind,
    keys: &KeyStore,
) -> StoreResult<PreparedCreate> {
    let mut out = props.clone();
    let passphrase = out.remove(ENCRYPTION_KEY).map(Zeroizing::new);
    drop_unset_quota(&mut out);
    if kind == DatasetKind::Volume {
        out.remove(PARENT);
        out.remove(SIZE);
    }

    let mut key_file = None;
    if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
        if out.get(ENCRYPTION).map(String::as_str) != Some("off") {
            let path = keys.persist(name, &passphrase)?;
            out.extend(key_properties(&path));
            key_file = Some(path);
        }
    }

    Ok(PreparedCreate {
        properties: out,
        key_file,
    })
}

/// Build the property set for an edit. Key material is always dropped.
pub fn normalize_for_edit(props: &Properties) -> Properties {
    let mut out = props.clone();
    if let Some(secret) = out.remove(ENCRYPTION_KEY) {
        drop(Zeroizing::new(secret));
    }
    drop_unset_quota(&mut out);
    out
}

fn drop_unset_quota(props: &mut Properties) {
    if props.get(QUOTA).is_some_and(|q| is_unset_quota(q)) {
        props.remove(QUOTA);
    }
}
