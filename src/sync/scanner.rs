use super::strategy::FileStamp;
use crate::error::{Result, SyncError};
use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Characters that are not allowed in mirrored entry names
pub const RESERVED_CHARS: [char; 2] = ['[', ']'];

/// Replacement for every reserved character
pub const REPLACEMENT_CHAR: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMeta {
    File(FileStamp),
    Directory,
}

/// A direct child of a scanned directory
#[derive(Debug, Clone)]
pub struct LevelEntry {
    pub name: OsString,
    pub path: PathBuf,
    pub meta: EntryMeta,
}

impl LevelEntry {
    pub fn kind(&self) -> EntryKind {
        match self.meta {
            EntryMeta::File(_) => EntryKind::File,
            EntryMeta::Directory => EntryKind::Directory,
        }
    }
}

/// An in-place rename performed by the sanitize phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Replace reserved characters in an entry name
pub fn sanitize_name(name: &str) -> Cow<'_, str> {
    if name.contains(RESERVED_CHARS) {
        Cow::Owned(name.replace(RESERVED_CHARS, &REPLACEMENT_CHAR.to_string()))
    } else {
        Cow::Borrowed(name)
    }
}

/// Lister for the direct children of one directory.
///
/// Symlinks are followed for classification: a link to a directory is
/// treated as a directory, a link to a file as a file.
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// List direct children, sorted by name
    pub fn list(&self) -> Result<Vec<LevelEntry>> {
        let mut entries = Vec::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for result in walker {
            let entry = result.map_err(|e| self.walk_error(e))?;
            let path = entry.path().to_path_buf();

            let link_metadata = || {
                entry.metadata().map_err(|e| {
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata unavailable"))
                })
            };
            let metadata = if entry.path_is_symlink() {
                // A dangling link is listed as the link itself, i.e. a file
                std::fs::metadata(&path).or_else(|e| {
                    tracing::debug!("Broken symlink {}: {}", path.display(), e);
                    link_metadata()
                })
            } else {
                link_metadata()
            };
            let metadata = metadata.map_err(|e| SyncError::ReadDirError {
                path: path.clone(),
                source: e,
            })?;

            let meta = if metadata.is_dir() {
                EntryMeta::Directory
            } else {
                EntryMeta::File(FileStamp::from_metadata(&metadata))
            };

            entries.push(LevelEntry {
                name: entry.file_name().to_os_string(),
                path,
                meta,
            });
        }

        Ok(entries)
    }

    /// Rename every child whose name contains reserved characters.
    ///
    /// Fails if the sanitized name is already taken, rather than overwriting it.
    pub fn sanitize(&self) -> Result<Vec<Rename>> {
        let mut renames = Vec::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for result in walker {
            let entry = result.map_err(|e| self.walk_error(e))?;

            // Names that are not valid UTF-8 are left untouched
            let Some(name) = entry.file_name().to_str() else {
                tracing::debug!("Skipping sanitize for non UTF-8 name: {}", entry.path().display());
                continue;
            };

            let sanitized = sanitize_name(name);
            if sanitized == name {
                continue;
            }

            let from = entry.path().to_path_buf();
            let to = self.root.join(sanitized.as_ref());

            if std::fs::symlink_metadata(&to).is_ok() {
                return Err(SyncError::RenameError {
                    from,
                    to,
                    source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
                });
            }

            std::fs::rename(&from, &to).map_err(|e| SyncError::RenameError {
                from: from.clone(),
                to: to.clone(),
                source: e,
            })?;

            renames.push(Rename { from, to });
        }

        Ok(renames)
    }

    fn walk_error(&self, err: walkdir::Error) -> SyncError {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let source = err
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
        SyncError::ReadDirError { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_list_direct_children_only() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("dir1")).unwrap();
        fs::write(root.join("file1.txt"), "content").unwrap();
        fs::write(root.join("dir1/file2.txt"), "content").unwrap();

        let entries = Scanner::new(root).list().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "dir1");
        assert_eq!(entries[0].kind(), EntryKind::Directory);
        assert_eq!(entries[1].name, "file1.txt");
        assert!(matches!(entries[1].meta, EntryMeta::File(stamp) if stamp.size == 7));
    }

    #[test]
    fn test_list_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let result = Scanner::new(temp.path().join("nope")).list();
        assert!(matches!(result, Err(SyncError::ReadDirError { .. })));
    }

    #[test]
    #[cfg(unix)]
    fn test_list_follows_symlinks() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("real")).unwrap();
        fs::write(root.join("data.bin"), "12345").unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link_dir")).unwrap();
        std::os::unix::fs::symlink(root.join("data.bin"), root.join("link_file")).unwrap();

        let entries = Scanner::new(root).list().unwrap();
        let link_dir = entries.iter().find(|e| e.name == "link_dir").unwrap();
        let link_file = entries.iter().find(|e| e.name == "link_file").unwrap();

        assert_eq!(link_dir.kind(), EntryKind::Directory);
        assert_eq!(link_file.kind(), EntryKind::File);
        assert!(matches!(link_file.meta, EntryMeta::File(stamp) if stamp.size == 5));
    }

    #[test]
    #[cfg(unix)]
    fn test_list_keeps_dangling_symlink_as_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::os::unix::fs::symlink(root.join("gone"), root.join("stale_link")).unwrap();

        let entries = Scanner::new(root).list().unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "stale_link");
        assert_eq!(entries[0].kind(), EntryKind::File);
    }

    #[test]
    fn test_sanitize_renames_in_place() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("song [live].mp3"), "x").unwrap();
        fs::create_dir(root.join("[album]")).unwrap();
        fs::write(root.join("plain.txt"), "y").unwrap();

        let renames = Scanner::new(root).sanitize().unwrap();

        assert_eq!(renames.len(), 2);
        assert!(root.join("song -live-.mp3").exists());
        assert!(root.join("-album-").is_dir());
        assert!(!root.join("song [live].mp3").exists());
        assert!(root.join("plain.txt").exists());
    }

    #[test]
    fn test_sanitize_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a[1]"), "bracketed").unwrap();
        fs::write(root.join("a-1-"), "existing").unwrap();

        let result = Scanner::new(root).sanitize();

        assert!(matches!(result, Err(SyncError::RenameError { .. })));
        assert_eq!(fs::read_to_string(root.join("a-1-")).unwrap(), "existing");
    }

    #[test]
    fn test_sanitize_name_examples() {
        assert_eq!(sanitize_name("a[b]c"), "a-b-c");
        assert!(matches!(sanitize_name("clean"), Cow::Borrowed(_)));
    }

    proptest! {
        #[test]
        fn sanitized_names_have_no_reserved_chars(name in "\\PC{0,40}") {
            let sanitized = sanitize_name(&name);
            prop_assert!(!sanitized.contains(RESERVED_CHARS));
            prop_assert_eq!(sanitized.chars().count(), name.chars().count());
        }

        #[test]
        fn sanitize_is_idempotent(name in "[a-z\\[\\]. ]{0,30}") {
            let once = sanitize_name(&name).into_owned();
            let twice = sanitize_name(&once).into_owned();
            prop_assert_eq!(once, twice);
        }
    }
}
