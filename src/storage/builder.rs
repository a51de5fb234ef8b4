//! Part-directory lifecycle: paths, locks and durability guards.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::WriteError;

use super::Disk;

/// Process-wide registry of live temporary part directories.
///
/// A directory present on disk but absent here is an orphan from an earlier
/// run and fair game for the janitor.
static TEMP_DIRS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive hold on one temporary part directory name.
///
/// Dropping the lock (with or without a committed part) releases the name;
/// any files left behind become eligible for garbage collection.
pub struct TempDirLock {
    path: PathBuf,
}

impl TempDirLock {
    /// Acquire the lock for `path`; a second acquisition is a logical error
    /// since temp indices are unique per process.
    pub(crate) fn acquire(path: PathBuf) -> Result<Self, WriteError> {
        let mut held = TEMP_DIRS.lock();
        if !held.insert(path.clone()) {
            return Err(WriteError::logical(format!(
                "temporary part directory {} is already locked",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    /// The locked directory.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for TempDirLock {
    fn drop(&mut self) {
        TEMP_DIRS.lock().remove(&self.path);
    }
}

/// Fsyncs a directory when the write scope ends.
pub struct DirectorySyncGuard {
    dir: Option<File>,
}

impl DirectorySyncGuard {
    /// Open `path` for fsync-on-drop.
    pub(crate) fn new(path: &PathBuf) -> Result<Self, WriteError> {
        Ok(Self {
            dir: Some(File::open(path)?),
        })
    }
}

impl Drop for DirectorySyncGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            // Failure here leaves durability to the final fsync pass.
            let _ = dir.sync_all();
        }
    }
}

/// Builder for one part directory on a reserved disk.
///
/// Projection sub-parts derive their builder from the parent's, so their
/// directories always nest inside the parent part.
#[derive(Clone)]
pub struct PartStorageBuilder {
    disk: Arc<Disk>,
    relative_data_path: String,
    part_dir: String,
}

impl PartStorageBuilder {
    pub(crate) fn new(
        disk: Arc<Disk>,
        relative_data_path: impl Into<String>,
        part_dir: impl Into<String>,
    ) -> Self {
        Self {
            disk,
            relative_data_path: relative_data_path.into(),
            part_dir: part_dir.into(),
        }
    }

    /// Disk the part lands on.
    pub fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    /// Absolute directory of the part.
    pub fn full_path(&self) -> PathBuf {
        self.disk
            .path()
            .join(&self.relative_data_path)
            .join(&self.part_dir)
    }

    /// Absolute path of a file inside the part directory.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.full_path().join(name)
    }

    /// Whether the part directory already exists on disk.
    pub fn exists(&self) -> bool {
        self.full_path().exists()
    }

    /// Create the part directory (and parents).
    pub fn create_directories(&self) -> Result<(), WriteError> {
        fs::create_dir_all(self.full_path())?;
        Ok(())
    }

    /// Remove the directory and everything beneath it.
    pub fn remove_recursive(&self) -> Result<(), WriteError> {
        if self.exists() {
            fs::remove_dir_all(self.full_path())?;
        }
        Ok(())
    }

    /// Builder for a projection sub-directory of this part.
    pub fn projection(&self, relative: &str) -> Self {
        Self {
            disk: Arc::clone(&self.disk),
            relative_data_path: self.relative_data_path.clone(),
            part_dir: format!("{}/{}", self.part_dir, relative),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PartStorageBuilder, TempDirLock};
    use crate::storage::Disk;

    #[test]
    fn temp_dir_lock_is_exclusive() {
        let path = std::path::PathBuf::from("/tmp/arbor-lock-test/tmp_insert_all_1_1_0");
        let lock = TempDirLock::acquire(path.clone()).expect("first lock");
        assert!(TempDirLock::acquire(path.clone()).is_err());
        drop(lock);
        let _relock = TempDirLock::acquire(path).expect("lock after release");
    }

    #[test]
    fn projection_builder_nests_under_parent() {
        let disk = Disk::new("default", "/data");
        let parent = PartStorageBuilder::new(disk, "tables/t", "tmp_insert_all_1_1_0");
        let child = parent.projection("agg.proj");
        assert_eq!(
            child.full_path(),
            std::path::PathBuf::from("/data/tables/t/tmp_insert_all_1_1_0/agg.proj")
        );
    }
}
