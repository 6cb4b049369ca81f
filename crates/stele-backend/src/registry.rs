use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::BackendError;
use crate::fslog::FsLogBackend;
use crate::memory::InMemoryBackend;
use crate::traits::StatementBackend;

/// Adapter selection and engine options, as they appear under `[backend]`
/// in the configuration file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BackendOptions {
    /// Registry name of the adapter to run.
    pub name: String,

    /// Log file location. Required by `fslog`, rejected by `memory`.
    pub path: Option<PathBuf>,

    /// Fsync every append. Only meaningful for `fslog`.
    pub sync_writes: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            path: None,
            sync_writes: false,
        }
    }
}

/// Errors raised while resolving configuration into a running adapter.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown backend {name:?}; known backends: {known}")]
    UnknownBackend { name: String, known: String },

    #[error("invalid options for backend {name:?}: {reason}")]
    InvalidOptions { name: String, reason: String },

    #[error("failed to open backend {name:?}: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: BackendError,
    },
}

type BuilderFn = fn(&BackendOptions) -> Result<Arc<dyn StatementBackend>, RegistryError>;

/// Fixed table of storage adapters.
///
/// The set of engines is decided at compile time and configuration selects
/// one by name; there is no runtime plugin surface. An unknown name fails
/// with the list of names that would have worked.
pub struct BackendRegistry {
    builders: BTreeMap<&'static str, BuilderFn>,
}

impl BackendRegistry {
    /// Registry holding every built-in adapter.
    pub fn with_defaults() -> Self {
        let mut builders: BTreeMap<&'static str, BuilderFn> = BTreeMap::new();
        builders.insert("memory", build_memory as BuilderFn);
        builders.insert("fslog", build_fslog as BuilderFn);
        Self { builders }
    }

    /// Known adapter names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.builders.keys().copied().collect()
    }

    /// Instantiate the adapter `options.name` selects.
    pub fn build(
        &self,
        options: &BackendOptions,
    ) -> Result<Arc<dyn StatementBackend>, RegistryError> {
        let builder =
            self.builders
                .get(options.name.as_str())
                .ok_or_else(|| RegistryError::UnknownBackend {
                    name: options.name.clone(),
                    known: self.names().join(", "),
                })?;
        let backend = builder(options)?;
        info!(backend = backend.name(), "storage backend ready");
        Ok(backend)
    }
}

fn build_memory(options: &BackendOptions) -> Result<Arc<dyn StatementBackend>, RegistryError> {
    if options.path.is_some() {
        return Err(RegistryError::InvalidOptions {
            name: "memory".to_string(),
            reason: "the memory backend takes no path".to_string(),
        });
    }
    if options.sync_writes {
        return Err(RegistryError::InvalidOptions {
            name: "memory".to_string(),
            reason: "sync_writes only applies to fslog".to_string(),
        });
    }
    Ok(Arc::new(InMemoryBackend::new()))
}

fn build_fslog(options: &BackendOptions) -> Result<Arc<dyn StatementBackend>, RegistryError> {
    let path = options
        .path
        .as_ref()
        .ok_or_else(|| RegistryError::InvalidOptions {
            name: "fslog".to_string(),
            reason: "fslog requires a path".to_string(),
        })?;
    let backend =
        FsLogBackend::open(path, options.sync_writes).map_err(|source| RegistryError::OpenFailed {
            name: "fslog".to_string(),
            source,
        })?;
    Ok(Arc::new(backend))
}
