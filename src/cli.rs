use crate::config::Config;
use crate::error::SyncError;
use crate::lifecycle::DEFAULT_GRACE_PERIOD;
use crate::sync::journal::default_log_path;
use crate::sync::strategy::ComparePolicy;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of directory levels processed concurrently
pub const DEFAULT_PARALLEL: usize = 10;

/// The only answer that lets a run proceed
pub const CONFIRM_YES: &str = "Yes";
/// The only answer that aborts; anything else asks again
pub const CONFIRM_NO: &str = "No";

#[derive(Parser, Debug)]
#[command(name = "mirrorsync")]
#[command(about = "Make a destination directory an exact mirror of a source directory", long_about = None)]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Mirror, confirming the destination interactively
    mirrorsync /data/photos /backup/photos

    # Non-interactive, sequential walk
    mirrorsync /data/photos /backup/photos --yes -j 1

    # Tolerate 2s of mtime skew (e.g. FAT destinations)
    mirrorsync /data /mnt/usb --mtime-tolerance 2

    # Machine-readable events
    mirrorsync /data /backup --yes --json

EXIT CODES:
    0 success, 1 wrong arguments, 2 destination not confirmed,
    3 source missing, 4 destination missing, 128+N killed by signal N,
    255 any other failure")]
pub struct Cli {
    /// Source directory
    pub source: PathBuf,

    /// Destination directory (must exist)
    pub destination: PathBuf,

    /// Skip the destination confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Number of directory levels processed concurrently (default: 10)
    #[arg(short = 'j', long)]
    pub parallel: Option<usize>,

    /// Seconds to wait for units to stop after a signal before aborting them (default: 3)
    #[arg(long, value_name = "SECS")]
    pub grace_period: Option<u64>,

    /// Only compare file size, skip mtime checks
    #[arg(long)]
    pub size_only: bool,

    /// Accept modification times that differ by up to SECS seconds (default: exact match)
    #[arg(long, value_name = "SECS")]
    pub mtime_tolerance: Option<u64>,

    /// Run log location (default: <program name>.log in the current directory)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Append to the run log instead of overwriting it
    #[arg(long)]
    pub append_log: bool,

    /// Output JSON (newline-delimited JSON for scripting)
    #[arg(long)]
    pub json: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only show errors)
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: <config dir>/mirrorsync/config.toml)
    #[arg(long, env = "MIRRORSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Effective run settings after merging CLI flags over the config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub parallel: usize,
    pub grace_period: Duration,
    pub log_file: PathBuf,
    pub policy: ComparePolicy,
}

impl Cli {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.parallel == Some(0) {
            return Err(SyncError::Usage("--parallel must be at least 1".to_string()));
        }
        if self.quiet && self.verbose > 0 {
            return Err(SyncError::Usage(
                "--quiet and --verbose are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Source must be an existing directory (exit 3), destination must exist (exit 4)
    pub fn validate_paths(&self) -> Result<(), SyncError> {
        if !self.source.is_dir() {
            return Err(SyncError::SourceNotFound {
                path: self.source.clone(),
            });
        }
        if !self.destination.exists() {
            return Err(SyncError::DestinationNotFound {
                path: self.destination.clone(),
            });
        }
        Ok(())
    }

    pub fn settings(&self, config: &Config) -> RunSettings {
        let parallel = self.parallel.or(config.parallel).unwrap_or(DEFAULT_PARALLEL).max(1);

        let grace_period = self
            .grace_period
            .or(config.grace_period_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_GRACE_PERIOD);

        let log_file = self
            .log_file
            .clone()
            .or_else(|| config.log_file.clone())
            .unwrap_or_else(default_log_path);

        let size_only = self.size_only || config.size_only.unwrap_or(false);
        let tolerance = self
            .mtime_tolerance
            .or(config.mtime_tolerance_secs)
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO);

        RunSettings {
            parallel,
            grace_period,
            log_file,
            policy: ComparePolicy::new(tolerance, size_only),
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        if self.quiet || self.json {
            return tracing::Level::ERROR;
        }

        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Ask the operator to confirm the destination.
///
/// Exactly `Yes` continues, exactly `No` aborts, anything else asks again.
/// End of input counts as `No`.
pub fn confirm_destination<R, W>(destination: &Path, mut input: R, mut output: W) -> Result<(), SyncError>
where
    R: BufRead,
    W: Write,
{
    let mut answer = String::new();
    loop {
        write!(
            output,
            "Confirm that {} is correct? Answer {} to continue, {} to cancel : ",
            destination.display(),
            CONFIRM_YES,
            CONFIRM_NO
        )?;
        output.flush()?;

        answer.clear();
        if input.read_line(&mut answer)? == 0 {
            writeln!(output)?;
            return Err(SyncError::UserAborted);
        }

        match answer.trim_end_matches(['\r', '\n']) {
            CONFIRM_YES => return Ok(()),
            CONFIRM_NO => return Err(SyncError::UserAborted),
            _ => continue,
        }
    }
}
