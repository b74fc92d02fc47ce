//! Validates arguments, builds the runtime, and drives the FUSE session to
//! completion.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use fuser::MountOption;
use tracing::info;

use crate::args::Args;
use crate::core::classify::ClassifierHandle;
use crate::core::{BackupManager, Config, Detector};
use crate::error::{Error, Result};
use crate::fs::SentinelFs;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn register_shutdown_handler() -> Result<()> {
	ctrlc::set_handler(move || {
		SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
	})
	.map_err(|err| Error::Mount(std::io::Error::new(std::io::ErrorKind::Other, err)))
}

pub fn run(args: Args) -> miette::Result<()> {
	let config = build_config(args.storage_path.clone(), args.entropy_threshold, args.backup_size_limit)?;

	if !config.storage_root.is_dir() {
		return Err(Error::StorageNotFound(config.storage_root).into());
	}
	if !args.mount_point.is_dir() {
		return Err(Error::MountPointNotFound(args.mount_point).into());
	}
	if std::fs::read_dir(&args.mount_point)
		.map_err(|_| Error::MountPointNotFound(args.mount_point.clone()))?
		.next()
		.is_some()
	{
		return Err(Error::MountPointNotEmpty(args.mount_point).into());
	}

	let backup = BackupManager::new(config.backup_root.clone(), config.backup_size_limit);
	backup
		.ensure_backup_dir()
		.map_err(|err| Error::BackupDirCreation(config.backup_root.clone(), err))?;

	let classifier = ClassifierHandle::new();
	let detector = Detector::new(config.entropy_threshold);
	let filesystem = SentinelFs::new(config, classifier, detector, backup);
	let stats = filesystem.stats_handle();

	let mut options = vec![MountOption::FSName("sentinelfs".to_string()), MountOption::AutoUnmount];
	if args.allow_other {
		options.push(MountOption::AllowOther);
	}
	for raw in &args.mount_options {
		options.push(MountOption::CustomOption(raw.clone()));
	}

	register_shutdown_handler()?;

	info!(mount_point = %args.mount_point.display(), "mounting");

	if args.foreground {
		fuser::mount2(filesystem, &args.mount_point, &options).map_err(Error::Mount)?;
	} else {
		run_supervised(filesystem, &args.mount_point, &options)?;
	}

	let snapshot = stats.snapshot();
	info!(
		total_writes = snapshot.total_writes,
		blocked_writes = snapshot.blocked_writes,
		backups_created = snapshot.backups_created,
		"unmounted"
	);
	Ok(())
}

fn build_config(storage_path: PathBuf, entropy_threshold: f64, backup_size_limit: u64) -> Result<Config> {
	if !(entropy_threshold > 0.0 && entropy_threshold < 8.0) {
		return Err(Error::InvalidEntropyThreshold(entropy_threshold));
	}
	Ok(Config::new(storage_path, entropy_threshold, backup_size_limit))
}

/// Mounts in a background session and blocks the calling thread on the shutdown
/// flag set by `register_shutdown_handler`, so `run` can still log a final
/// statistics snapshot after the session is torn down. This is the default
/// (non-`--foreground`) path; `--foreground` instead uses `fuser::mount2`
/// directly, which blocks the calling thread itself until externally unmounted.
fn run_supervised(filesystem: SentinelFs, mount_point: &Path, options: &[MountOption]) -> Result<()> {
	let session = fuser::spawn_mount2(filesystem, mount_point, options).map_err(Error::Mount)?;

	while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
		thread::sleep(Duration::from_millis(200));
	}

	info!("shutdown requested, unmounting");
	drop(session);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::DEFAULT_ENTROPY_THRESHOLD;

	#[test]
	fn rejects_zero_entropy_threshold() {
		let err = build_config(PathBuf::from("/nonexistent"), 0.0, 1024).unwrap_err();
		assert!(matches!(err, Error::InvalidEntropyThreshold(_)));
	}

	#[test]
	fn rejects_entropy_threshold_of_eight() {
		let err = build_config(PathBuf::from("/nonexistent"), 8.0, 1024).unwrap_err();
		assert!(matches!(err, Error::InvalidEntropyThreshold(_)));
	}

	#[test]
	fn accepts_default_entropy_threshold() {
		assert!(build_config(PathBuf::from("/nonexistent"), DEFAULT_ENTROPY_THRESHOLD, 1024).is_ok());
	}
}
