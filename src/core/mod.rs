//! The write-path classifier and its JIT backup protocol.
//!
//! Shannon-entropy computation, structural content classification, the
//! whitelist/detector decision policy, the first-write backup heuristic, and the
//! process-wide statistics. Every type here is synchronous and allocation-light on
//! the hot path; none of it performs FUSE protocol work, which lives in `crate::fs`.

pub mod backup;
pub mod classify;
pub mod detector;
pub mod entropy;
pub mod stats;
pub mod whitelist;

use std::path::PathBuf;

pub use backup::BackupManager;
pub use classify::ContentLabel;
pub use detector::{Detector, Verdict};
pub use stats::Stats;

/// Default Shannon-entropy threshold above which a non-whitelisted write is blocked.
pub const DEFAULT_ENTROPY_THRESHOLD: f64 = 7.5;

/// Default maximum pre-image size, in bytes, eligible for JIT backup (50 MiB).
pub const DEFAULT_BACKUP_SIZE_LIMIT: u64 = 50 * 1024 * 1024;

/// Name of the hidden directory, relative to `storage_root`, that holds backups.
pub const BACKUP_DIR_NAME: &str = ".sentinelfs_backups";

/// Immutable runtime configuration, constructed once at mount init.
#[derive(Debug, Clone)]
pub struct Config {
	/// Absolute path to the backing directory.
	pub storage_root: PathBuf,
	/// Absolute path to the backup directory, conventionally
	/// `storage_root/.sentinelfs_backups`.
	pub backup_root: PathBuf,
	/// Shannon-entropy threshold in (0, 8). Default 7.5.
	pub entropy_threshold: f64,
	/// Pre-image size, in bytes, above which a file is never backed up. Default 50 MiB.
	pub backup_size_limit: u64,
}

impl Config {
	pub fn new(storage_root: PathBuf, entropy_threshold: f64, backup_size_limit: u64) -> Self {
		let backup_root = storage_root.join(BACKUP_DIR_NAME);
		Self {
			storage_root,
			backup_root,
			entropy_threshold,
			backup_size_limit,
		}
	}
}

/// A decision record: the result of running the detector over one write buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionRecord {
	pub label: DecisionLabel,
	/// Computed only when `label` is `Unknown` (entropy is skipped on the whitelist
	/// short-circuit).
	pub entropy: Option<f64>,
	pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionLabel {
	Whitelisted,
	Unknown,
}
