use serde::Serialize;
use std::path::PathBuf;

/// Counters for a single directory level.
///
/// Each task owns its own statistics; nothing is shared between levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatistics {
    pub source_entries: usize,
    pub source_files: usize,
    pub source_dirs: usize,
    pub dest_entries: usize,
    pub dest_files: usize,
    pub dest_dirs: usize,
    /// Copied because absent from destination
    pub files_created: usize,
    /// Copied because size or mtime differed
    pub files_updated: usize,
    pub files_skipped: usize,
    pub dest_files_deleted: usize,
    pub dest_dirs_deleted: usize,
    pub entries_renamed: usize,
    pub bytes_copied: u64,
}

impl SyncStatistics {
    pub fn files_copied(&self) -> usize {
        self.files_created + self.files_updated
    }

    pub fn entries_deleted(&self) -> usize {
        self.dest_files_deleted + self.dest_dirs_deleted
    }

    /// Source files that already had a destination counterpart
    pub fn source_files_found_in_dest(&self) -> usize {
        self.files_updated + self.files_skipped
    }

    fn add(&mut self, other: &SyncStatistics) {
        self.source_entries += other.source_entries;
        self.source_files += other.source_files;
        self.source_dirs += other.source_dirs;
        self.dest_entries += other.dest_entries;
        self.dest_files += other.dest_files;
        self.dest_dirs += other.dest_dirs;
        self.files_created += other.files_created;
        self.files_updated += other.files_updated;
        self.files_skipped += other.files_skipped;
        self.dest_files_deleted += other.dest_files_deleted;
        self.dest_dirs_deleted += other.dest_dirs_deleted;
        self.entries_renamed += other.entries_renamed;
        self.bytes_copied += other.bytes_copied;
    }
}

/// Result of one synchronization task and every task nested under it
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub stats: SyncStatistics,
    pub children: Vec<TaskReport>,
}

impl TaskReport {
    /// Number of directory levels in this report, itself included
    pub fn levels(&self) -> usize {
        1 + self.children.iter().map(TaskReport::levels).sum::<usize>()
    }

    /// Fold the statistics of this level and all nested levels
    pub fn totals(&self) -> SyncStatistics {
        let mut totals = self.stats;
        for child in &self.children {
            totals.add(&child.totals());
        }
        totals
    }

    /// Find the report for a nested source directory
    pub fn find(&self, source: &std::path::Path) -> Option<&TaskReport> {
        if self.source == source {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(source))
    }
}
