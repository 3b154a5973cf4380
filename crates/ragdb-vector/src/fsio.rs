//! Two-step file replacement: write `<file>.tmp` and fsync, then rename over
//! the target and fsync the directory. A rename within one directory is
//! atomic on POSIX filesystems.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ragdb_core::Result;

pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn write_tmp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp)
}

/// Renames `tmp` over `path`. Once the rename succeeds the new file is
/// visible, so a failed directory fsync is logged rather than returned.
pub fn commit(tmp: &Path, path: &Path) -> Result<()> {
    fs::rename(tmp, path)?;
    if let Err(e) = sync_parent(path) {
        tracing::warn!(path = %path.display(), error = %e, "directory fsync failed after rename");
    }
    Ok(())
}

/// Best-effort removal of a staged file that will not be committed.
pub fn discard(tmp: &Path) {
    if let Err(e) = fs::remove_file(tmp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %tmp.display(), error = %e, "could not remove staged file");
        }
    }
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = write_tmp(path, bytes)?;
    commit(&tmp, path)
}

/// Makes the directory entry written by a rename durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}
