//! The private directory an extraction runs in before it is published
//!
//! A [`StagingDir`] lives inside the destination directory so publishing is
//! a single rename on the same filesystem. Dropping it without publishing
//! deletes everything that was extracted.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{ExtractError, Result};

/// Name prefix of staging directories
pub const STAGING_PREFIX: &str = "unball-";

/// A staging directory, removed on drop unless published as a whole
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
}

impl StagingDir {
    /// Create a fresh staging directory inside `parent`
    pub fn new_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Top-level entries, sorted by name
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs_err::read_dir(self.path())? {
            entries.push(entry?.path());
        }
        entries.sort();
        Ok(entries)
    }

    /// Move one entry of the staging directory to `destination`.
    ///
    /// The rest of the staging directory is deleted when `self` drops.
    pub fn publish_entry(self, entry: &Path, destination: &Path) -> Result<PathBuf> {
        ensure_vacant(destination)?;
        // A directory must be writable to be moved to another parent.
        apply_umask(entry)?;
        rename_noreplace(entry, destination)?;
        Ok(destination.to_path_buf())
    }

    /// Move the whole staging directory to `destination`
    pub fn publish_all(self, destination: &Path) -> Result<PathBuf> {
        ensure_vacant(destination)?;
        rename_noreplace(self.dir.path(), destination)?;
        // Nothing is left at the old path for the drop to clean up.
        let _ = self.dir.keep();
        apply_umask(destination)?;
        Ok(destination.to_path_buf())
    }
}

fn ensure_vacant(destination: &Path) -> Result<()> {
    if fs_err::symlink_metadata(destination).is_ok() {
        return Err(ExtractError::AlreadyExists {
            path: destination.to_path_buf(),
        });
    }
    Ok(())
}

/// Rename `from` to `to` unless `to` exists.
///
/// Linux refuses atomically. Elsewhere, or on filesystems without
/// `RENAME_NOREPLACE`, a plain rename follows the `ensure_vacant` check and
/// can still replace a file or empty directory created in between.
fn rename_noreplace(from: &Path, to: &Path) -> Result<()> {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        use std::ffi::CString;
        use std::io;
        use std::os::unix::ffi::OsStrExt;

        let from_c = CString::new(from.as_os_str().as_bytes()).map_err(io::Error::from)?;
        let to_c = CString::new(to.as_os_str().as_bytes()).map_err(io::Error::from)?;
        // SAFETY: both pointers are NUL-terminated strings that outlive the call.
        let rc = unsafe {
            libc::renameat2(
                libc::AT_FDCWD,
                from_c.as_ptr(),
                libc::AT_FDCWD,
                to_c.as_ptr(),
                libc::RENAME_NOREPLACE,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EEXIST) => {
                return Err(ExtractError::AlreadyExists {
                    path: to.to_path_buf(),
                })
            }
            Some(libc::EINVAL) | Some(libc::ENOSYS) => {}
            _ => {
                return Err(io::Error::new(
                    err.kind(),
                    format!(
                        "failed to rename {} to {}: {err}",
                        from.display(),
                        to.display()
                    ),
                )
                .into())
            }
        }
    }
    fs_err::rename(from, to)?;
    Ok(())
}

/// Give the owner read access to every file and read/search access to every
/// directory below `root`, whatever modes the extractor left behind.
#[cfg(unix)]
pub fn normalize_permissions(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs_err::symlink_metadata(root)?;
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        return Ok(());
    }

    let mode = metadata.permissions().mode();
    let wanted = if file_type.is_dir() {
        mode | 0o500
    } else {
        mode | 0o400
    };
    if wanted != mode {
        fs_err::set_permissions(root, std::fs::Permissions::from_mode(wanted))?;
    }

    // Directories are fixed before descending or read_dir would fail on them.
    if file_type.is_dir() {
        for entry in fs_err::read_dir(root)? {
            normalize_permissions(&entry?.path())?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn normalize_permissions(_root: &Path) -> Result<()> {
    Ok(())
}

/// The process umask, read once
#[cfg(unix)]
pub fn umask() -> u32 {
    use std::sync::OnceLock;

    static UMASK: OnceLock<u32> = OnceLock::new();
    *UMASK.get_or_init(|| {
        // SAFETY: umask() always succeeds; the original mask is put back
        // immediately.
        let mask = unsafe { libc::umask(0o022) };
        unsafe { libc::umask(mask) };
        u32::from(mask)
    })
}

/// Reset the published item's own mode to what a freshly created file or
/// directory would get under the current umask
#[cfg(unix)]
fn apply_umask(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs_err::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let full = if metadata.is_dir() { 0o777 } else { 0o666 };
    fs_err::set_permissions(path, std::fs::Permissions::from_mode(full & !umask()))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_umask(_path: &Path) -> Result<()> {
    Ok(())
}
