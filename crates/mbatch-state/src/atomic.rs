//! Write-to-temp, fsync, rename.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{self, StateError};

/// Sibling temporary path used while writing `target`.
#[must_use]
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

/// Replace `target` with `bytes` so that readers see either the old or the
/// new content. Missing parent directories are created.
///
/// # Errors
///
/// Returns [`StateError::Io`] if any step fails; the temporary file is
/// removed on a best-effort basis.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> error::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
    }
    let tmp = temp_path_for(target);
    let result = write_and_sync(&tmp, bytes).and_then(|()| {
        fs::rename(&tmp, target).map_err(|e| StateError::io(target, e))
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }
    sync_parent(target);
    Ok(())
}

/// Copy `source` over `target` through a sibling temporary file.
///
/// # Errors
///
/// Returns [`StateError::Io`] if reading or writing fails.
pub fn copy_atomic(source: &Path, target: &Path) -> error::Result<()> {
    let bytes = fs::read(source).map_err(|e| StateError::io(source, e))?;
    write_atomic(target, &bytes)
}

fn write_and_sync(tmp: &Path, bytes: &[u8]) -> error::Result<()> {
    let mut file = File::create(tmp).map_err(|e| StateError::io(tmp, e))?;
    file.write_all(bytes).map_err(|e| StateError::io(tmp, e))?;
    file.sync_all().map_err(|e| StateError::io(tmp, e))
}

#[cfg(unix)]
fn sync_parent(target: &Path) {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_target: &Path) {}
