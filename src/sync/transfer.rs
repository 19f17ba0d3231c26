use super::scanner::EntryKind;
use crate::error::{Result, SyncError};
use filetime::FileTime;
use std::fs;
use std::path::Path;

/// Filesystem mutations applied by a synchronization pass.
///
/// All calls block; callers run them under `spawn_blocking`.
pub struct Transferrer;

impl Transferrer {
    /// Copy content, permissions and timestamps from `source` to `dest`.
    ///
    /// A directory or symlink occupying `dest` is removed first. Returns bytes
    /// written.
    pub fn copy_file(source: &Path, dest: &Path) -> Result<u64> {
        if let Ok(existing) = fs::symlink_metadata(dest) {
            if existing.is_dir() {
                tracing::debug!("Replacing directory with file: {}", dest.display());
                fs::remove_dir_all(dest).map_err(|e| SyncError::DeleteError {
                    path: dest.to_path_buf(),
                    source: e,
                })?;
            } else if existing.file_type().is_symlink() {
                // Never write through a link into its target
                tracing::debug!("Replacing symlink with file: {}", dest.display());
                fs::remove_file(dest).map_err(|e| SyncError::DeleteError {
                    path: dest.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let source_meta = fs::metadata(source).map_err(|e| SyncError::CopyError {
            path: source.to_path_buf(),
            source: e,
        })?;

        // fs::copy carries the permission bits over
        let bytes_written = fs::copy(source, dest).map_err(|e| SyncError::CopyError {
            path: source.to_path_buf(),
            source: e,
        })?;

        let atime = FileTime::from_last_access_time(&source_meta);
        let mtime = FileTime::from_last_modification_time(&source_meta);
        filetime::set_file_times(dest, atime, mtime).map_err(|e| SyncError::CopyError {
            path: dest.to_path_buf(),
            source: e,
        })?;

        tracing::debug!("Copied: {} -> {} ({} bytes)", source.display(), dest.display(), bytes_written);
        Ok(bytes_written)
    }

    /// Remove a destination entry: files and symlinks directly, directories
    /// with their whole subtree. Returns what was removed.
    pub fn remove_entry(path: &Path) -> Result<EntryKind> {
        let metadata = fs::symlink_metadata(path).map_err(|e| SyncError::DeleteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        if metadata.is_dir() {
            fs::remove_dir_all(path).map_err(|e| SyncError::DeleteError {
                path: path.to_path_buf(),
                source: e,
            })?;
            tracing::debug!("Deleted directory tree: {}", path.display());
            Ok(EntryKind::Directory)
        } else {
            fs::remove_file(path).map_err(|e| SyncError::DeleteError {
                path: path.to_path_buf(),
                source: e,
            })?;
            tracing::debug!("Deleted file: {}", path.display());
            Ok(EntryKind::File)
        }
    }

    /// Create `path` if it is missing. Returns true when it was created.
    pub fn ensure_dir(path: &Path) -> Result<bool> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(false),
            _ => {
                fs::create_dir(path).map_err(|e| SyncError::CreateDirError {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                Ok(true)
            }
        }
    }
}
