pub mod journal;
pub mod output;
pub mod scanner;
pub mod stats;
pub mod strategy;
pub mod transfer;

use crate::error::{Result, SyncError};
use crate::lifecycle::{join_unit, Supervisor};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use journal::SyncLog;
use output::SyncEvent;
use scanner::{EntryKind, EntryMeta, Scanner};
use stats::{SyncStatistics, TaskReport};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strategy::{classify_dest_entry, ComparePolicy, DestState, EntryClassification, FileStamp};
use transfer::Transferrer;

/// One synchronization unit bound to a source/destination directory pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Root tasks require the destination to exist; nested ones create it
    pub is_root: bool,
}

impl SyncTask {
    pub fn root(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            is_root: true,
        }
    }

    pub fn nested(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            is_root: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub policy: ComparePolicy,
    /// Emit NDJSON events on stdout
    pub json: bool,
}

/// Result of the file-level passes of one directory
struct LevelOutcome {
    stats: SyncStatistics,
    subdirectories: Vec<OsString>,
}

struct EngineInner {
    options: SyncOptions,
    log: SyncLog,
    supervisor: Supervisor,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(options: SyncOptions, log: SyncLog, supervisor: Supervisor) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                options,
                log,
                supervisor,
            }),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    /// Mirror `source` into the existing directory `destination`.
    ///
    /// The root task runs as a registered unit like every nested one, so the
    /// controller can drain the whole tree.
    pub async fn sync(&self, source: &Path, destination: &Path) -> Result<TaskReport> {
        tracing::info!("Starting sync: {} → {}", source.display(), destination.display());
        if self.inner.options.json {
            SyncEvent::Start {
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
            }
            .emit();
        }

        let task = SyncTask::root(source, destination);
        let handle = self
            .inner
            .supervisor
            .spawn_unit(source.to_path_buf(), self.synchronize(task));
        join_unit(handle, source).await
    }

    /// Synchronize one directory pair and, depth first, everything under it.
    ///
    /// Phases run strictly in order: sanitize, reconcile, prune, descend.
    /// Each subdirectory becomes its own unit; all of them are joined before
    /// this task completes.
    pub fn synchronize(&self, task: SyncTask) -> BoxFuture<'static, Result<TaskReport>> {
        let engine = self.clone();
        Box::pin(async move { engine.run_task(task).await })
    }

    async fn run_task(self, task: SyncTask) -> Result<TaskReport> {
        let supervisor = &self.inner.supervisor;

        if let Err(e) = supervisor.checkpoint() {
            return Err(self.stopped(e));
        }

        let permit = match supervisor.acquire_worker().await {
            Ok(permit) => permit,
            Err(e) => return Err(self.stopped(e)),
        };

        let engine = self.clone();
        let level_task = task.clone();
        let level = tokio::task::spawn_blocking(move || engine.process_level(&level_task))
            .await
            .unwrap_or_else(|e| {
                Err(SyncError::UnitFailed {
                    path: task.source.clone(),
                    reason: e.to_string(),
                })
            });
        // The permit is not held while joining children
        drop(permit);

        let level = match level {
            Ok(level) => level,
            Err(e) => return Err(self.stopped(e)),
        };

        let children = match self.descend(&task, &level.subdirectories).await {
            Ok(children) => children,
            Err(e) => return Err(self.stopped(e)),
        };

        Ok(TaskReport {
            source: task.source,
            destination: task.destination,
            stats: level.stats,
            children,
        })
    }

    /// Phase 4: one unit per source subdirectory, joined before returning
    async fn descend(&self, task: &SyncTask, subdirectories: &[OsString]) -> Result<Vec<TaskReport>> {
        let supervisor = &self.inner.supervisor;
        let log = &self.inner.log;

        let children: Vec<SyncTask> = subdirectories
            .iter()
            .map(|name| SyncTask::nested(task.source.join(name), task.destination.join(name)))
            .collect();

        log.block(
            children
                .iter()
                .map(|child| format!("\nThe directory {} is going to be processed", child.source.display())),
        )?;
        // Parent lines must be on disk before any child writes
        log.flush()?;

        let mut handles = Vec::with_capacity(children.len());
        for child in children {
            if supervisor.is_cancelled() {
                break;
            }
            let path = child.source.clone();
            let handle = supervisor.spawn_unit(path.clone(), self.synchronize(child));
            handles.push((path, handle));
        }
        let spawned_all = handles.len() == subdirectories.len();

        // Joined in completion order so the first real failure stops the
        // remaining siblings at their next checkpoint
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(path, handle)| async move {
                let result = join_unit(handle, &path).await;
                (path, result)
            })
            .collect();

        let mut reports = Vec::with_capacity(pending.len());
        let mut failure: Option<SyncError> = None;
        while let Some((path, result)) = pending.next().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    if !e.is_cancelled() {
                        tracing::error!("Unit for {} failed, stopping the run", path.display());
                        supervisor.cancel();
                    }
                    failure = match failure {
                        Some(previous) if !previous.is_cancelled() => Some(previous),
                        _ => Some(e),
                    };
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if !spawned_all {
            return Err(SyncError::Cancelled);
        }

        reports.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(reports)
    }

    /// Phases 1-3 for one directory pair. Blocking.
    fn process_level(&self, task: &SyncTask) -> Result<LevelOutcome> {
        let supervisor = &self.inner.supervisor;
        let log = &self.inner.log;

        if !task.source.exists() {
            return Err(SyncError::SourceNotFound {
                path: task.source.clone(),
            });
        }

        log.block([
            format!("\nSOURCE Directory : {}", task.source.display()),
            format!("TARGET Directory : {}", task.destination.display()),
        ])?;

        if !task.destination.exists() {
            if task.is_root {
                return Err(SyncError::DestinationNotFound {
                    path: task.destination.clone(),
                });
            }
            Transferrer::ensure_dir(&task.destination)?;
            tracing::info!(
                "The destination directory {} does not exist, it is created",
                task.destination.display()
            );
            log.line(format!(
                "The destination directory {} does not exist, it is created",
                task.destination.display()
            ))?;
            self.event(|| SyncEvent::CreateDir {
                path: task.destination.clone(),
            });
        }

        let mut stats = SyncStatistics::default();
        let source_scanner = Scanner::new(&task.source);

        // Phase 1: sanitize
        supervisor.checkpoint()?;
        for rename in source_scanner.sanitize()? {
            stats.entries_renamed += 1;
            let message = format!(
                "Entry {} contains square brackets, it is renamed to {}",
                rename.from.display(),
                rename.to.display()
            );
            tracing::info!("{}", message);
            log.line(message)?;
            self.event(|| SyncEvent::Rename {
                from: rename.from.clone(),
                to: rename.to.clone(),
            });
        }

        // Phase 2: reconcile
        let source_entries = source_scanner.list()?;
        let mut lines = vec![format!("\nSEARCHING FOR FILES IN {} :", task.source.display())];
        if source_entries.is_empty() {
            lines.push(format!("There are no files in {}", task.source.display()));
        }
        log.block(lines)?;

        let mut source_names = HashSet::with_capacity(source_entries.len());
        let mut subdirectories = Vec::new();

        for entry in &source_entries {
            supervisor.checkpoint()?;
            stats.source_entries += 1;
            source_names.insert(entry.name.clone());
            let dest_path = task.destination.join(&entry.name);

            match entry.meta {
                EntryMeta::Directory => {
                    stats.source_dirs += 1;
                    self.clear_file_in_place_of_dir(&dest_path, &mut stats)?;
                    subdirectories.push(entry.name.clone());
                }
                EntryMeta::File(stamp) => {
                    stats.source_files += 1;
                    self.reconcile_file(&entry.path, &dest_path, &stamp, &mut stats)?;
                }
            }
        }

        log.block([
            format!("\nSTATISTICS FOR {} :", task.source.display()),
            format!("Number of total items found in source directory: {}", stats.source_entries),
            format!("Number of files found in source directory: {}", stats.source_files),
            format!("Number of directories found in source directory: {}", stats.source_dirs),
            format!(
                "Number of source files found in target directory: {}",
                stats.source_files_found_in_dest()
            ),
            format!("Number of source files copied to target directory: {}", stats.files_copied()),
            format!(
                "Number of source files found in target not copied to target directory: {}",
                stats.files_skipped
            ),
        ])?;

        // Phase 3: prune
        let dest_entries = Scanner::new(&task.destination).list()?;
        let mut lines = vec![format!("\nSEARCHING FOR FILES IN {} :", task.destination.display())];
        if dest_entries.is_empty() {
            lines.push(format!("There are no files in {}", task.destination.display()));
        }
        log.block(lines)?;

        for entry in &dest_entries {
            supervisor.checkpoint()?;
            stats.dest_entries += 1;
            match entry.kind() {
                EntryKind::Directory => stats.dest_dirs += 1,
                EntryKind::File => stats.dest_files += 1,
            }

            let in_source = source_names.contains(&entry.name);
            if let Some(action) = classify_dest_entry(in_source) {
                self.apply(action, &task.source.join(&entry.name), &entry.path, &mut stats)?;
            }
        }

        log.block([
            format!("\nSTATISTICS FOR {} :", task.destination.display()),
            format!("Total files and directories in target directory: {}", stats.dest_entries),
            format!("Files found in target directory: {}", stats.dest_files),
            format!("Directories found in target directory: {}", stats.dest_dirs),
            format!(
                "Files found in target directory but not in source directory then deleted : {}",
                stats.dest_files_deleted
            ),
            format!(
                "Directories found in target directory but not in source directory then deleted : {}",
                stats.dest_dirs_deleted
            ),
            format!("Files and directories deleted from target directory: {}", stats.entries_deleted()),
        ])?;

        tracing::debug!(
            "Level done: {} ({} created, {} updated, {} skipped, {} deleted)",
            task.source.display(),
            stats.files_created,
            stats.files_updated,
            stats.files_skipped,
            stats.entries_deleted()
        );
        self.event(|| SyncEvent::Level {
            source: task.source.clone(),
            destination: task.destination.clone(),
            stats,
        });

        Ok(LevelOutcome {
            stats,
            subdirectories,
        })
    }

    fn reconcile_file(
        &self,
        source: &Path,
        dest: &Path,
        stamp: &FileStamp,
        stats: &mut SyncStatistics,
    ) -> Result<()> {
        let dest_state = match std::fs::metadata(dest) {
            Ok(meta) if meta.is_dir() => DestState::Directory,
            Ok(meta) => DestState::File(FileStamp::from_metadata(&meta)),
            Err(_) => DestState::Missing,
        };

        let action = self.inner.options.policy.classify_file(stamp, &dest_state);
        self.apply(action, source, dest, stats)
    }

    /// Carry out one classified action for the `source`/`dest` pair
    fn apply(
        &self,
        action: EntryClassification,
        source: &Path,
        dest: &Path,
        stats: &mut SyncStatistics,
    ) -> Result<()> {
        let log = &self.inner.log;
        match action {
            EntryClassification::SkipUnchanged => {
                stats.files_skipped += 1;
                log.line(format!(
                    "File {} already exists in the destination directory with the same size and modification time, it is not copied",
                    source.display()
                ))?;
                self.event(|| SyncEvent::Skip {
                    path: dest.to_path_buf(),
                });
            }
            EntryClassification::CreateCopy => {
                let bytes = Transferrer::copy_file(source, dest)?;
                stats.files_created += 1;
                stats.bytes_copied += bytes;
                let message = format!(
                    "File {} does not exist in the destination directory, it is copied",
                    source.display()
                );
                tracing::info!("{}", message);
                log.line(message)?;
                self.event(|| SyncEvent::Create {
                    path: dest.to_path_buf(),
                    size: bytes,
                });
            }
            EntryClassification::UpdateCopy => {
                let bytes = Transferrer::copy_file(source, dest)?;
                stats.files_updated += 1;
                stats.bytes_copied += bytes;
                let message = format!(
                    "File {} already exists in the destination directory but with different size or modification time, it is copied",
                    source.display()
                );
                tracing::info!("{}", message);
                log.line(message)?;
                self.event(|| SyncEvent::Update {
                    path: dest.to_path_buf(),
                    size: bytes,
                });
            }
            EntryClassification::DeleteFromDest => {
                let removed = Transferrer::remove_entry(dest)?;
                let message = match removed {
                    EntryKind::Directory => {
                        stats.dest_dirs_deleted += 1;
                        format!(
                            "Directory {} exists in the destination directory but does not exist in the source directory, it is deleted",
                            dest.display()
                        )
                    }
                    EntryKind::File => {
                        stats.dest_files_deleted += 1;
                        format!(
                            "File {} exists in the destination directory but does not exist in the source directory, it is deleted",
                            dest.display()
                        )
                    }
                };
                tracing::info!("{}", message);
                log.line(message)?;
                self.event(|| SyncEvent::Delete {
                    path: dest.to_path_buf(),
                    is_dir: removed == EntryKind::Directory,
                });
            }
        }
        Ok(())
    }

    /// A destination file sitting where a source directory will be mirrored
    fn clear_file_in_place_of_dir(&self, dest: &Path, stats: &mut SyncStatistics) -> Result<()> {
        let Ok(meta) = std::fs::symlink_metadata(dest) else {
            return Ok(());
        };
        if meta.is_dir() {
            return Ok(());
        }

        Transferrer::remove_entry(dest)?;
        stats.dest_files_deleted += 1;
        let message = format!(
            "File {} is replaced by a directory of the same name, it is deleted",
            dest.display()
        );
        tracing::info!("{}", message);
        self.inner.log.line(message)?;
        self.event(|| SyncEvent::Delete {
            path: dest.to_path_buf(),
            is_dir: false,
        });
        Ok(())
    }

    /// Flush this unit's log output on the way out of a failed or cancelled
    /// task. A real failure also cancels the run so no sibling keeps working.
    fn stopped(&self, err: SyncError) -> SyncError {
        if !err.is_cancelled() && !self.inner.supervisor.is_cancelled() {
            tracing::debug!("Unit failed, cancelling the run: {}", err);
            self.inner.supervisor.cancel();
        }
        if let Err(flush_err) = self.inner.log.flush() {
            tracing::warn!("{}", flush_err);
        }
        err
    }

    fn event(&self, make: impl FnOnce() -> SyncEvent) {
        if self.inner.options.json {
            make().emit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    fn engine() -> SyncEngine {
        SyncEngine::new(SyncOptions::default(), SyncLog::disabled(), Supervisor::new(4))
    }

    #[tokio::test]
    async fn test_root_requires_destination() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let missing = dest.path().join("missing");

        let result = engine().sync(source.path(), &missing).await;

        assert!(matches!(result, Err(SyncError::DestinationNotFound { .. })));
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dest = TempDir::new().unwrap();
        let result = engine()
            .sync(&dest.path().join("no_such_source"), dest.path())
            .await;
        assert!(matches!(result, Err(SyncError::SourceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_nested_task_creates_destination() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("f.txt"), "x").unwrap();
        let nested_dest = dest.path().join("created");

        let report = engine()
            .synchronize(SyncTask::nested(source.path(), &nested_dest))
            .await
            .unwrap();

        assert!(nested_dest.join("f.txt").exists());
        assert_eq!(report.stats.files_created, 1);
    }

    #[tokio::test]
    async fn test_file_replaced_by_directory() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::create_dir(source.path().join("thing")).unwrap();
        fs::write(source.path().join("thing/inner.txt"), "in").unwrap();
        fs::write(dest.path().join("thing"), "i was a file").unwrap();

        let report = engine().sync(source.path(), dest.path()).await.unwrap();

        assert!(dest.path().join("thing/inner.txt").is_file());
        assert_eq!(report.stats.dest_files_deleted, 1);
    }

    #[tokio::test]
    async fn test_directory_replaced_by_file() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("thing"), "now a file").unwrap();
        fs::create_dir_all(dest.path().join("thing/sub")).unwrap();

        let report = engine().sync(source.path(), dest.path()).await.unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("thing")).unwrap(), "now a file");
        assert_eq!(report.stats.files_updated, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), "a").unwrap();
        let engine = engine();
        engine.supervisor().cancel();

        let result = engine.sync(source.path(), dest.path()).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(!dest.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_update_copies_changed_mtime() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let src_file = source.path().join("a.txt");
        let dst_file = dest.path().join("a.txt");
        fs::write(&src_file, "same").unwrap();
        fs::write(&dst_file, "SAME").unwrap();
        filetime::set_file_mtime(&src_file, FileTime::from_unix_time(2_000_000_000, 0)).unwrap();
        filetime::set_file_mtime(&dst_file, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();

        let report = engine().sync(source.path(), dest.path()).await.unwrap();

        assert_eq!(report.stats.files_updated, 1);
        assert_eq!(fs::read_to_string(&dst_file).unwrap(), "same");
    }
}
