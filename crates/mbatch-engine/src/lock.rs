//! Exclusive run lock on the results tree.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use mbatch_types::{RunSource, RunVersion};

/// Lock file created in the results root.
pub const LOCK_FILE: &str = ".mbatch.lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("results tree is locked by another run ({}): {holder}", path.display())]
    Held { path: PathBuf, holder: String },

    #[error("cannot create lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the duration of a mutating run; removes the lock file on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create `results_root/.mbatch.lock` exclusively.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] if the lock file already exists.
    pub fn acquire(
        results_root: &Path,
        run_source: &RunSource,
        run_version: &RunVersion,
    ) -> Result<Self, LockError> {
        let path = results_root.join(LOCK_FILE);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(results_root).map_err(io_err)?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().replace('\n', ", "))
                    .unwrap_or_default();
                return Err(LockError::Held { path, holder });
            }
            Err(e) => return Err(io_err(e)),
        };
        let body = format!(
            "pid={}\nrun_source={run_source}\nrun_version={run_version}\n",
            std::process::id()
        );
        if let Err(e) = file.write_all(body.as_bytes()) {
            let _ = fs::remove_file(&path);
            return Err(io_err(e));
        }
        tracing::debug!(lock = %path.display(), "Acquired run lock");
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquire(root: &Path) -> Result<RunLock, LockError> {
        RunLock::acquire(root, &RunSource::new("GDC"), &RunVersion::new("2024_01_01"))
    }

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = acquire(dir.path()).unwrap();

        let err = acquire(dir.path()).unwrap_err();
        assert!(matches!(err, LockError::Held { .. }));
        assert!(err.to_string().contains("run_source=GDC"), "got: {err}");

        drop(lock);
        assert!(acquire(dir.path()).is_ok());
    }

    #[test]
    fn creates_missing_results_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("results");
        let lock = acquire(&root).unwrap();
        assert!(lock.path().exists());
    }
}
