//! Result storage.
//!
//! Finished jobs hand their output files to a [`Storage`] under stable names
//! relative to the model directory (`pdrgrid/pdr<name>.hdf`, ...). The skip
//! check asks the same storage whether a result is already there.

mod local;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{StorageConfig, StorageKind};

pub use local::LocalStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("{0} is not in storage")]
    Missing(String),
    #[error("{0} is not a path below the storage root")]
    OutsideRoot(String),
}

/// Where result files go
pub trait Storage: Send + Sync {
    /// Copy a local file to `remote`, creating directories as needed
    fn store_file(&self, local: &Path, remote: &str) -> Result<(), StorageError>;

    /// Copy `remote` to a local file, creating directories as needed
    fn retrieve_file(&self, remote: &str, local: &Path) -> Result<(), StorageError>;

    /// Names of the entries in a storage directory, empty if it does not exist
    fn list_files(&self, dir: &str) -> Result<Vec<String>, StorageError>;

    fn file_exists(&self, remote: &str) -> bool;

    /// Full location recorded in the database for `remote`
    fn locate(&self, remote: &str) -> String {
        remote.to_string()
    }
}

/// Open the configured storage for one model directory
pub fn open_storage(config: &StorageConfig, model_path: &Path) -> Result<Arc<dyn Storage>, StorageError> {
    match config.kind {
        StorageKind::Local => Ok(Arc::new(LocalStorage::new(model_path)?)),
    }
}
