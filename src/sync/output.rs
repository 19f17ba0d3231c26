use super::stats::SyncStatistics;
use serde::Serialize;
use std::path::PathBuf;

/// JSON output mode for machine-readable sync events
/// Uses NDJSON format (newline-delimited JSON)
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Start {
        source: PathBuf,
        destination: PathBuf,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
    },
    CreateDir {
        path: PathBuf,
    },
    Create {
        path: PathBuf,
        size: u64,
    },
    Update {
        path: PathBuf,
        size: u64,
    },
    Skip {
        path: PathBuf,
    },
    Delete {
        path: PathBuf,
        is_dir: bool,
    },
    Level {
        source: PathBuf,
        destination: PathBuf,
        stats: SyncStatistics,
    },
    Interrupted {
        signal: String,
        exit_code: i32,
    },
    Error {
        error: String,
        exit_code: i32,
    },
    Summary {
        levels: usize,
        files_created: usize,
        files_updated: usize,
        files_skipped: usize,
        files_deleted: usize,
        dirs_deleted: usize,
        bytes_copied: u64,
        duration_secs: f64,
    },
}

impl SyncEvent {
    /// Emit this event as JSON to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }
}
