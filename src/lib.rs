//! One-way directory mirroring.
//!
//! [`sync::SyncEngine`] walks a source/destination pair level by level,
//! copying new and changed files (by size and mtime), pruning entries that
//! no longer exist in the source, and descending into each subdirectory as
//! its own cancellable unit. [`lifecycle::Controller`] owns signal handling
//! and the cleanup of those units.

pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod sync;
