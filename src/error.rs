use std::path::PathBuf;
use thiserror::Error;

/// Exit code for any failure without a dedicated code
pub const EXIT_GENERIC_FAILURE: i32 = 255;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Wrong arguments: {0}\nUsage: mirrorsync <SOURCE> <DESTINATION>")]
    Usage(String),

    #[error("Aborted: the destination directory was not confirmed by the user.")]
    UserAborted,

    #[error("The source directory {path} does not exist\nMake sure the path exists and you have read permissions.")]
    SourceNotFound { path: PathBuf },

    #[error("The destination directory {path} does not exist\nCreate it before mirroring into it.")]
    DestinationNotFound { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read directory: {path}\nCause: {source}\nCheck that the directory exists and you have read permissions.")]
    ReadDirError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to copy file: {path}\nCause: {source}\nCheck disk space and write permissions on the destination.")]
    CopyError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to delete: {path}\nCause: {source}")]
    DeleteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to rename {from} to {to}\nCause: {source}")]
    RenameError {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}\nCause: {source}")]
    CreateDirError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write log file: {path}\nCause: {source}")]
    Log {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Descent unit for {path} failed: {reason}")]
    UnitFailed { path: PathBuf, reason: String },

    #[error("Synchronization cancelled")]
    Cancelled,
}

impl SyncError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 1,
            Self::UserAborted => 2,
            Self::SourceNotFound { .. } => 3,
            Self::DestinationNotFound { .. } => 4,
            _ => EXIT_GENERIC_FAILURE,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Format bytes for human-readable display
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(SyncError::Usage("x".into()).exit_code(), 1);
        assert_eq!(SyncError::UserAborted.exit_code(), 2);
        assert_eq!(
            SyncError::SourceNotFound { path: PathBuf::from("/a") }.exit_code(),
            3
        );
        assert_eq!(
            SyncError::DestinationNotFound { path: PathBuf::from("/b") }.exit_code(),
            4
        );
        assert_eq!(SyncError::Cancelled.exit_code(), EXIT_GENERIC_FAILURE);
        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(
            SyncError::CopyError { path: PathBuf::from("/c"), source: io }.exit_code(),
            EXIT_GENERIC_FAILURE
        );
    }

    #[test]
    fn test_source_not_found_message() {
        let err = SyncError::SourceNotFound { path: PathBuf::from("/missing") };
        assert!(err.to_string().contains("/missing does not exist"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
