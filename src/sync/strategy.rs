use filetime::FileTime;
use std::time::Duration;

/// Per-entry decision taken during a synchronization pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClassification {
    /// Exists in source only
    CreateCopy,
    /// Exists in both, size or mtime differ
    UpdateCopy,
    /// Exists in both with identical size and mtime
    SkipUnchanged,
    /// Exists in destination only
    DeleteFromDest,
}

/// Size and modification time of a regular file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub modified: FileTime,
}

impl FileStamp {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: FileTime::from_last_modification_time(metadata),
        }
    }
}

/// What currently sits at the destination path of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestState {
    Missing,
    File(FileStamp),
    Directory,
}

/// Change-detection policy for files present on both sides.
///
/// The default is exact: byte size and modification time must match to the
/// nanosecond the filesystem reports. Two distinct files with identical size
/// and mtime are indistinguishable and are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComparePolicy {
    /// Accepted mtime difference (zero means exact match)
    mtime_tolerance: Duration,
    /// Only compare file size, skip mtime checks
    size_only: bool,
}

impl ComparePolicy {
    pub fn exact() -> Self {
        Self::default()
    }

    pub fn new(mtime_tolerance: Duration, size_only: bool) -> Self {
        Self {
            mtime_tolerance,
            size_only,
        }
    }

    pub fn is_exact(&self) -> bool {
        !self.size_only && self.mtime_tolerance.is_zero()
    }

    /// Classify a source file against whatever exists at its destination path
    pub fn classify_file(&self, source: &FileStamp, dest: &DestState) -> EntryClassification {
        match dest {
            DestState::Missing => EntryClassification::CreateCopy,
            // A directory squatting on a file's name must be replaced
            DestState::Directory => EntryClassification::UpdateCopy,
            DestState::File(dest) => {
                if self.needs_update(source, dest) {
                    EntryClassification::UpdateCopy
                } else {
                    EntryClassification::SkipUnchanged
                }
            }
        }
    }

    fn needs_update(&self, source: &FileStamp, dest: &FileStamp) -> bool {
        if source.size != dest.size {
            return true;
        }

        if self.size_only {
            return false;
        }

        !self.mtime_matches(&source.modified, &dest.modified)
    }

    fn mtime_matches(&self, source: &FileTime, dest: &FileTime) -> bool {
        if self.mtime_tolerance.is_zero() {
            return source == dest;
        }

        let diff = (nanos(source) - nanos(dest)).unsigned_abs();
        diff <= self.mtime_tolerance.as_nanos()
    }
}

/// Classify a destination entry during pruning. Entries with a source
/// counterpart were already handled by reconciliation.
pub fn classify_dest_entry(in_source: bool) -> Option<EntryClassification> {
    if in_source {
        None
    } else {
        Some(EntryClassification::DeleteFromDest)
    }
}

fn nanos(time: &FileTime) -> i128 {
    time.unix_seconds() as i128 * 1_000_000_000 + time.nanoseconds() as i128
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(size: u64, secs: i64, nanos: u32) -> FileStamp {
        FileStamp {
            size,
            modified: FileTime::from_unix_time(secs, nanos),
        }
    }

    #[test]
    fn test_classify_missing_is_create() {
        let policy = ComparePolicy::exact();
        let action = policy.classify_file(&stamp(10, 1_000, 0), &DestState::Missing);
        assert_eq!(action, EntryClassification::CreateCopy);
    }

    #[test]
    fn test_classify_identical_is_skip() {
        let policy = ComparePolicy::exact();
        let action =
            policy.classify_file(&stamp(10, 1_000, 5), &DestState::File(stamp(10, 1_000, 5)));
        assert_eq!(action, EntryClassification::SkipUnchanged);
    }

    #[test]
    fn test_classify_size_mismatch_is_update() {
        let policy = ComparePolicy::exact();
        let action =
            policy.classify_file(&stamp(10, 1_000, 0), &DestState::File(stamp(11, 1_000, 0)));
        assert_eq!(action, EntryClassification::UpdateCopy);
    }

    #[test]
    fn test_exact_policy_has_no_tolerance_window() {
        let policy = ComparePolicy::exact();
        // One nanosecond apart is still a change
        let action =
            policy.classify_file(&stamp(10, 1_000, 0), &DestState::File(stamp(10, 1_000, 1)));
        assert_eq!(action, EntryClassification::UpdateCopy);
    }

    #[test]
    fn test_tolerance_policy() {
        let policy = ComparePolicy::new(Duration::from_secs(1), false);
        assert!(!policy.is_exact());
        assert_eq!(
            policy.classify_file(&stamp(10, 1_000, 0), &DestState::File(stamp(10, 1_001, 0))),
            EntryClassification::SkipUnchanged
        );
        assert_eq!(
            policy.classify_file(&stamp(10, 1_003, 0), &DestState::File(stamp(10, 1_000, 0))),
            EntryClassification::UpdateCopy
        );
    }

    #[test]
    fn test_size_only_policy_ignores_mtime() {
        let policy = ComparePolicy::new(Duration::ZERO, true);
        assert_eq!(
            policy.classify_file(&stamp(10, 1_000, 0), &DestState::File(stamp(10, 9_000, 0))),
            EntryClassification::SkipUnchanged
        );
        assert_eq!(
            policy.classify_file(&stamp(10, 1_000, 0), &DestState::File(stamp(12, 1_000, 0))),
            EntryClassification::UpdateCopy
        );
    }

    #[test]
    fn test_directory_in_place_of_file_is_update() {
        let policy = ComparePolicy::exact();
        assert_eq!(
            policy.classify_file(&stamp(1, 1, 0), &DestState::Directory),
            EntryClassification::UpdateCopy
        );
    }

    #[test]
    fn test_dest_only_entry_is_deleted() {
        assert_eq!(classify_dest_entry(false), Some(EntryClassification::DeleteFromDest));
        assert_eq!(classify_dest_entry(true), None);
    }
}
