//! The run log: a plain-text file shared by every unit of one run.
//!
//! Writes are serialized through a mutex. `flush` pushes buffered lines
//! to disk and must be called before child units are spawned.

use crate::error::{Result, SyncError};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Truncate any previous log (root runs)
    Overwrite,
    /// Keep previous content
    Append,
}

struct Inner {
    path: PathBuf,
    writer: BufWriter<File>,
}

#[derive(Clone)]
pub struct SyncLog {
    inner: Option<Arc<Mutex<Inner>>>,
}

impl SyncLog {
    pub fn open(path: &Path, mode: LogMode) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            LogMode::Overwrite => options.write(true).truncate(true),
            LogMode::Append => options.append(true),
        };

        let file = options.open(path).map_err(|e| SyncError::Log {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            inner: Some(Arc::new(Mutex::new(Inner {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
            }))),
        })
    }

    /// A log that drops everything
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.as_ref().map(|inner| lock(inner).path.clone())
    }

    pub fn line(&self, text: impl AsRef<str>) -> Result<()> {
        self.block(std::iter::once(text))
    }

    /// Write several lines without interleaving with other writers
    pub fn block<I, S>(&self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        let mut guard = lock(inner);
        let Inner { path, writer } = &mut *guard;
        for line in lines {
            writeln!(writer, "{}", line.as_ref()).map_err(|e| SyncError::Log {
                path: path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Flush buffered lines and sync them to disk
    pub fn flush(&self) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        let mut guard = lock(inner);
        let Inner { path, writer } = &mut *guard;
        writer
            .flush()
            .and_then(|_| writer.get_ref().sync_data())
            .map_err(|e| SyncError::Log {
                path: path.clone(),
                source: e,
            })
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Default log location: `<current dir>/<program stem>.log`
pub fn default_log_path() -> PathBuf {
    let stem = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_os_string()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").into());

    let mut name = stem;
    name.push(".log");
    PathBuf::from(name)
}
