use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse classification callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Config,
    Execution,
    Parse,
    Validation,
    NotFound,
    KeyReuse,
    PartialStream,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("[VS1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[VS1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[VS1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[VS1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[VS1200] invalid_encryption_key_length: passphrase is {len} bytes, expected 32..=512")]
    InvalidKeyLength { len: usize },

    #[error("[VS1201] no_properties_to_edit: nothing left to set on `{dataset}`")]
    NoPropertiesToEdit { dataset: String },

    #[error("[VS1202] invalid request: {0}")]
    InvalidRequest(String),

    #[error("[VS1300] dont_reuse_encryption_keys: key file {} already exists", .path.display())]
    KeyReuse { path: PathBuf },

    #[error("[VS1301] failed_to_write_encryption_key: {}: {source}", .path.display())]
    KeyWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[VS2000] {command} exited with code {status}: {diagnostic}")]
    Execution {
        command: String,
        status: i32,
        diagnostic: String,
    },

    #[error("[VS2001] {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("[VS2100] unexpected command output: {0}")]
    Parse(String),

    #[error("[VS2200] error_getting_pool: pool {0} not found")]
    PoolNotFound(String),

    #[error("[VS2201] error_getting_dataset: dataset {0} not found")]
    DatasetNotFound(String),

    #[error("[VS2300] receive into `{dataset}` interrupted: {reason}")]
    PartialStream { dataset: String, reason: String },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Wrap the error with operation or entity context. Kind and identifier are preserved.
    pub fn context(self, context: impl Into<String>) -> Self {
        StoreError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error once every context layer is peeled off.
    pub fn root(&self) -> &StoreError {
        match self {
            StoreError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io(_) | StoreError::KeyWrite { .. } => ErrorKind::Io,
            StoreError::Toml(_) | StoreError::Yaml(_) | StoreError::InvalidConfig(_) => {
                ErrorKind::Config
            }
            StoreError::Execution { .. } | StoreError::Timeout { .. } => ErrorKind::Execution,
            StoreError::Parse(_) => ErrorKind::Parse,
            StoreError::InvalidKeyLength { .. }
            | StoreError::NoPropertiesToEdit { .. }
            | StoreError::InvalidRequest(_) => ErrorKind::Validation,
            StoreError::PoolNotFound(_) | StoreError::DatasetNotFound(_) => ErrorKind::NotFound,
            StoreError::KeyReuse { .. } => ErrorKind::KeyReuse,
            StoreError::PartialStream { .. } => ErrorKind::PartialStream,
            StoreError::Context { source, .. } => source.kind(),
        }
    }

    /// Stable machine-matchable identifier, part of the API contract.
    pub fn identifier(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "io_error",
            StoreError::Toml(_) | StoreError::Yaml(_) => "config_parse_error",
            StoreError::InvalidConfig(_) => "invalid_config",
            StoreError::InvalidKeyLength { .. } => "invalid_encryption_key_length",
            StoreError::NoPropertiesToEdit { .. } => "no_properties_to_edit",
            StoreError::InvalidRequest(_) => "invalid_request",
            StoreError::KeyReuse { .. } => "dont_reuse_encryption_keys",
            StoreError::KeyWrite { .. } => "failed_to_write_encryption_key",
            StoreError::Execution { .. } => "command_failed",
            StoreError::Timeout { .. } => "command_timed_out",
            StoreError::Parse(_) => "parse_error",
            StoreError::PoolNotFound(_) => "error_getting_pool",
            StoreError::DatasetNotFound(_) => "error_getting_dataset",
            StoreError::PartialStream { .. } => "partial_stream",
            StoreError::Context { source, .. } => source.identifier(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "VS1000",
            StoreError::Toml(_) => "VS1001",
            StoreError::Yaml(_) => "VS1002",
            StoreError::InvalidConfig(_) => "VS1100",
            StoreError::InvalidKeyLength { .. } => "VS1200",
            StoreError::NoPropertiesToEdit { .. } => "VS1201",
            StoreError::InvalidRequest(_) => "VS1202",
            StoreError::KeyReuse { .. } => "VS1300",
            StoreError::KeyWrite { .. } => "VS1301",
            StoreError::Execution { .. } => "VS2000",
            StoreError::Timeout { .. } => "VS2001",
            StoreError::Parse(_) => "VS2100",
            StoreError::PoolNotFound(_) => "VS2200",
            StoreError::DatasetNotFound(_) => "VS2201",
            StoreError::PartialStream { .. } => "VS2300",
            StoreError::Context { source, .. } => source.code(),
        }
    }
}
