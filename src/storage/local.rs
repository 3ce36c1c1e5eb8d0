use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};

use crate::storage::{Storage, StorageError};

/// Files kept in a directory on this host
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Use `root` as storage, creating it if needed
    pub fn new(root: &Path) -> Result<LocalStorage, StorageError> {
        fs::create_dir_all(root).map_err(|source| StorageError::Io { path: root.to_path_buf(), source })?;
        info!("Local storage at {}", root.display());
        Ok(LocalStorage { root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, remote: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(remote);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if remote.is_empty() || !contained {
            return Err(StorageError::OutsideRoot(remote.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn copy(from: &Path, to: &Path) -> Result<(), StorageError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::Io { path: parent.to_path_buf(), source })?;
    }
    fs::copy(from, to).map_err(|source| StorageError::Io { path: from.to_path_buf(), source })?;
    Ok(())
}

impl Storage for LocalStorage {
    fn store_file(&self, local: &Path, remote: &str) -> Result<(), StorageError> {
        let target = self.resolve(remote)?;
        copy(local, &target)?;
        debug!("Stored {} as {}", local.display(), target.display());
        Ok(())
    }

    fn retrieve_file(&self, remote: &str, local: &Path) -> Result<(), StorageError> {
        let source = self.resolve(remote)?;
        if !source.is_file() {
            return Err(StorageError::Missing(remote.to_string()));
        }
        copy(&source, local)?;
        debug!("Retrieved {} to {}", source.display(), local.display());
        Ok(())
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let path = if dir.is_empty() || dir == "." { self.root.clone() } else { self.resolve(dir)? };
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&path).map_err(|source| StorageError::Io { path: path.clone(), source })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io { path: path.clone(), source })?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn file_exists(&self, remote: &str) -> bool {
        self.resolve(remote).map(|p| p.is_file()).unwrap_or(false)
    }

    fn locate(&self, remote: &str) -> String {
        self.root.join(remote).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_retrieve() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(&root.path().join("model")).unwrap();

        let local = work.path().join("TEXTOUT");
        fs::write(&local, "done").unwrap();
        storage.store_file(&local, "pdrgrid/TEXTOUT0100_30_10_20_00").unwrap();
        assert!(storage.file_exists("pdrgrid/TEXTOUT0100_30_10_20_00"));
        assert_eq!(storage.list_files("pdrgrid").unwrap(), vec!["TEXTOUT0100_30_10_20_00"]);

        let back = work.path().join("out/copy");
        storage.retrieve_file("pdrgrid/TEXTOUT0100_30_10_20_00", &back).unwrap();
        assert_eq!(fs::read_to_string(back).unwrap(), "done");
    }

    #[test]
    fn missing_entries() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(root.path()).unwrap();
        assert!(!storage.file_exists("pdrgrid/none"));
        assert!(storage.list_files("oniongrid").unwrap().is_empty());
        let err = storage.retrieve_file("pdrgrid/none", &root.path().join("x")).unwrap_err();
        assert!(matches!(err, StorageError::Missing(_)));
    }

    #[test]
    fn paths_stay_below_root() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(root.path()).unwrap();
        let err = storage.store_file(Path::new("/etc/hostname"), "../escape").unwrap_err();
        assert!(matches!(err, StorageError::OutsideRoot(_)));
        assert!(!storage.file_exists("/etc/hostname"));
    }

    #[test]
    fn locate_gives_full_path() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(root.path()).unwrap();
        assert_eq!(
            storage.locate("pdrgrid/pdr1.hdf"),
            root.path().join("pdrgrid/pdr1.hdf").to_string_lossy()
        );
    }
}
