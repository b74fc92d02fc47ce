//! Fatal, startup-time error type.
//!
//! Everything past mount initialization is non-fatal by contract (see
//! `core::backup` and `core::classify`): a classifier failure degrades to an
//! `unknown` label, a backup failure is logged and swallowed, and a detector
//! block is a decision, not an error. Only the failures below abort the process.

use std::path::PathBuf;

/// Errors that can abort the process before or during mount.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
	#[error("storage path does not exist or is not a directory: {0}")]
	#[diagnostic(help("create the directory first, or check the path"))]
	StorageNotFound(PathBuf),

	#[error("mount point does not exist or is not a directory: {0}")]
	#[diagnostic(help("create an empty directory to mount onto"))]
	MountPointNotFound(PathBuf),

	#[error("mount point is not empty: {0}")]
	MountPointNotEmpty(PathBuf),

	#[error("failed to create backup directory {0}")]
	BackupDirCreation(PathBuf, #[source] std::io::Error),

	#[error("entropy threshold must be in (0, 8), got {0}")]
	InvalidEntropyThreshold(f64),

	#[error("FUSE mount failed")]
	Mount(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
