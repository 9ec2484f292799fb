//! Passphrase persistence for encrypted datasets.
//!
//! Each (dataset name, passphrase) pair maps to exactly one file under the key
//! directory. The file is written once with owner-only permissions and then
//! referenced by the dataset's `keylocation`; writing the same pair twice is
//! refused.

use crate::error::{StoreError, StoreResult};
use crate::props::Properties;
use log::{info, warn};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zeroize::Zeroizing;

pub const MIN_KEY_LEN: usize = 32;
pub const MAX_KEY_LEN: usize = 512;

/// Key-storage directory plus the rules for writing into it.
#[derive(Debug, Clone)]
pub struct KeyStore {
    directory: PathBuf,
}

impl KeyStore {
    /// Key store rooted at `directory`; nothing is created until a key is written.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory key files are written to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Deterministic location for a (name, passphrase) pair.
    pub fn key_path(&self, name: &str, passphrase: &str) -> PathBuf {
        let seed = Zeroizing::new(format!("{name}-{passphrase}"));
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
        self.directory.join(id.to_string())
    }

    /// Validate and write the passphrase, returning the file it now lives in.
    ///
    /// Nothing touches the filesystem unless the length check passes.
    pub fn persist(&self, name: &str, passphrase: &str) -> StoreResult<PathBuf> {
        validate_length(passphrase)?;

        let path = self.key_path(name, passphrase);
        if path.exists() {
            return Err(StoreError::KeyReuse { path });
        }

        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.directory)
            .map_err(|source| StoreError::KeyWrite {
                path: self.directory.clone(),
                source,
            })?;

        // create_new keeps the exclusivity check atomic with the write.
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::KeyReuse { path });
            }
            Err(source) => return Err(StoreError::KeyWrite { path, source }),
        };

        if let Err(source) = file
            .write_all(passphrase.as_bytes())
            .and_then(|_| file.sync_all())
        {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(StoreError::KeyWrite { path, source });
        }

        info!("wrote encryption key for {} to {}", name, path.display());
        Ok(path)
    }

    /// Remove a key file that no dataset ended up referencing.
    pub fn discard(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => info!("discarded unused key file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to discard key file {}: {}", path.display(), err),
        }
    }
}

/// `keylocation`/`keyformat` pair pointing the store at a persisted key.
pub fn key_properties(path: &Path) -> Properties {
    let mut props = Properties::new();
    props.insert(
        "keylocation".to_string(),
        format!("file://{}", path.display()),
    );
    props.insert("keyformat".to_string(), "passphrase".to_string());
    props
}

fn validate_length(passphrase: &str) -> StoreResult<()> {
    let len = passphrase.len();
    if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&len) {
        return Err(StoreError::InvalidKeyLength { len });
    }
    Ok(())
}
