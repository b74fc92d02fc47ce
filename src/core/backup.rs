//! The JIT Backup Manager.
//!
//! On the first accepted write to a path after mount, copies the pre-image of the
//! target file into the backup directory, subject to a size cap. Ordering is strict:
//! this runs, to completion, before the Detector and before the underlying write are
//! permitted to proceed.
//!
//! The "first write" heuristic is approximate on purpose: `offset == 0` and a
//! pre-existing file of non-zero size. This under-triggers for random-access writes
//! that start mid-file, and over-triggers (produces a second, distinctly-timestamped
//! backup) for an offset-0 write to a file that was already modified earlier in the
//! run — including after a truncate-to-zero-then-rewrite. Both tradeoffs are accepted
//! and preserved here verbatim rather than papered over with extra bookkeeping.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, trace, warn};

use super::stats::Stats;

/// Copy buffer size for the pre-image copy. Not performance-critical.
const COPY_BUFFER_SIZE: usize = 8 * 1024;

pub struct BackupManager {
	backup_root: PathBuf,
	size_limit: u64,
	/// Path -> pre-image size last backed up this run. An additive tightening of the
	/// offset-0 heuristic: a second offset-0 write is only suppressed when the
	/// pre-image is the exact same size as the one already saved ("the same
	/// generation"). A pre-image of a different size — e.g. after a
	/// truncate-then-rewrite — is a new generation and still gets backed up, so this
	/// never regresses the heuristic's documented tradeoffs, only dedupes the exact
	/// no-op retrigger case.
	seen: Mutex<std::collections::HashMap<PathBuf, u64>>,
}

impl BackupManager {
	pub fn new(backup_root: PathBuf, size_limit: u64) -> Self {
		Self {
			backup_root,
			size_limit,
			seen: Mutex::new(std::collections::HashMap::new()),
		}
	}

	/// Creates the backup directory with owner-only permissions if it doesn't
	/// already exist. Called once, during mount initialization.
	pub fn ensure_backup_dir(&self) -> io::Result<()> {
		if !self.backup_root.exists() {
			fs::create_dir_all(&self.backup_root)?;
			set_owner_only(&self.backup_root)?;
		}
		Ok(())
	}

	/// Consults the first-write heuristic for a write at `offset` to `backing_path`,
	/// and performs the backup if warranted. `logical_path` supplies the basename
	/// used in the backup's file name. Never returns an error: all failures are
	/// logged and swallowed, so the detector always runs regardless of what happens
	/// here.
	pub fn maybe_backup(&self, backing_path: &Path, logical_path: &Path, offset: i64, stats: &Stats) {
		if offset != 0 {
			return;
		}

		let pre_image_size = match fs::metadata(backing_path) {
			Ok(meta) => meta.len(),
			Err(_) => {
				trace!(path = %backing_path.display(), "no pre-image to stat, nothing to back up");
				return;
			}
		};

		if pre_image_size == 0 {
			trace!(path = %backing_path.display(), "zero-length pre-image, nothing to save");
			return;
		}

		if pre_image_size > self.size_limit {
			warn!(
				path = %backing_path.display(),
				pre_image_size,
				limit = self.size_limit,
				"pre-image exceeds backup size limit, skipping backup"
			);
			return;
		}

		{
			let seen = self.seen.lock().expect("backup registry mutex poisoned");
			if seen.get(backing_path) == Some(&pre_image_size) {
				debug!(path = %backing_path.display(), pre_image_size, "pre-image already backed up this generation, skipping duplicate backup");
				return;
			}
		}

		match self.copy_backup(backing_path, logical_path) {
			Ok(backup_path) => {
				stats.record_backup();
				self.seen
					.lock()
					.expect("backup registry mutex poisoned")
					.insert(backing_path.to_path_buf(), pre_image_size);
				info!(path = %backup_path.display(), bytes = pre_image_size, "created JIT backup");
			}
			Err(err) => {
				warn!(path = %backing_path.display(), error = %err, "backup failed, proceeding to detector without a backup");
			}
		}
	}

	fn copy_backup(&self, backing_path: &Path, logical_path: &Path) -> io::Result<PathBuf> {
		let basename = logical_path
			.file_name()
			.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "logical path has no file name"))?;

		let unix_seconds = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
			.as_secs();

		let backup_path = self
			.backup_root
			.join(format!("{}.{unix_seconds}.backup", basename.to_string_lossy()));

		let mut src = File::open(backing_path)?;
		let mut dst = File::create(&backup_path)?;
		let mut buf = [0u8; COPY_BUFFER_SIZE];
		loop {
			let n = src.read(&mut buf)?;
			if n == 0 {
				break;
			}
			dst.write_all(&buf[..n])?;
		}
		dst.sync_all()?;

		Ok(backup_path)
	}
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> io::Result<()> {
	use std::os::unix::fs::PermissionsExt;
	fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> io::Result<()> {
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	fn manager(limit: u64) -> (BackupManager, tempfile::TempDir) {
		let dir = tempdir().unwrap();
		let backup_root = dir.path().join(".sentinelfs_backups");
		let mgr = BackupManager::new(backup_root, limit);
		mgr.ensure_backup_dir().unwrap();
		(mgr, dir)
	}

	#[test]
	fn backs_up_preimage_on_first_write_at_offset_zero() {
		let (mgr, dir) = manager(1024 * 1024);
		let stats = Stats::default();
		let target = dir.path().join("notes.txt");
		fs::write(&target, vec![b'x'; 1000]).unwrap();

		mgr.maybe_backup(&target, Path::new("notes.txt"), 0, &stats);

		assert_eq!(stats.snapshot().backups_created, 1);
		let entries: Vec<_> = fs::read_dir(&mgr.backup_root).unwrap().collect();
		assert_eq!(entries.len(), 1);
		let backup_path = entries[0].as_ref().unwrap().path();
		assert!(backup_path.file_name().unwrap().to_string_lossy().starts_with("notes.txt."));
		let contents = fs::read(&backup_path).unwrap();
		assert_eq!(contents, vec![b'x'; 1000]);
	}

	#[test]
	fn does_not_back_up_nonzero_offset_write() {
		let (mgr, dir) = manager(1024 * 1024);
		let stats = Stats::default();
		let target = dir.path().join("notes.txt");
		fs::write(&target, vec![b'x'; 1000]).unwrap();

		mgr.maybe_backup(&target, Path::new("notes.txt"), 512, &stats);

		assert_eq!(stats.snapshot().backups_created, 0);
	}

	#[test]
	fn does_not_back_up_zero_length_preimage() {
		let (mgr, dir) = manager(1024 * 1024);
		let stats = Stats::default();
		let target = dir.path().join("empty.txt");
		fs::write(&target, b"").unwrap();

		mgr.maybe_backup(&target, Path::new("empty.txt"), 0, &stats);

		assert_eq!(stats.snapshot().backups_created, 0);
	}

	#[test]
	fn does_not_back_up_missing_preimage() {
		let (mgr, dir) = manager(1024 * 1024);
		let stats = Stats::default();
		let target = dir.path().join("never-existed.txt");

		mgr.maybe_backup(&target, Path::new("never-existed.txt"), 0, &stats);

		assert_eq!(stats.snapshot().backups_created, 0);
	}

	#[test]
	fn exactly_at_size_limit_is_backed_up_one_byte_over_is_skipped() {
		let (mgr, dir) = manager(1024);
		let stats = Stats::default();

		let at_limit = dir.path().join("at_limit.bin");
		fs::write(&at_limit, vec![0u8; 1024]).unwrap();
		mgr.maybe_backup(&at_limit, Path::new("at_limit.bin"), 0, &stats);
		assert_eq!(stats.snapshot().backups_created, 1);

		let over_limit = dir.path().join("over_limit.bin");
		fs::write(&over_limit, vec![0u8; 1025]).unwrap();
		mgr.maybe_backup(&over_limit, Path::new("over_limit.bin"), 0, &stats);
		assert_eq!(stats.snapshot().backups_created, 1, "oversize pre-image must not be backed up");
	}

	#[test]
	fn offset_zero_write_to_a_differently_sized_preimage_backs_up_again() {
		let (mgr, dir) = manager(1024 * 1024);
		let stats = Stats::default();
		let target = dir.path().join("notes.txt");

		fs::write(&target, vec![b'a'; 100]).unwrap();
		mgr.maybe_backup(&target, Path::new("notes.txt"), 0, &stats);

		// A genuinely new generation of content (different size) after a
		// truncate-then-rewrite must still be backed up.
		fs::write(&target, vec![b'b'; 200]).unwrap();
		mgr.maybe_backup(&target, Path::new("notes.txt"), 0, &stats);

		assert_eq!(stats.snapshot().backups_created, 2, "a differently-sized pre-image is a new generation");
	}

	#[test]
	fn repeated_offset_zero_write_with_unchanged_preimage_is_not_backed_up_twice() {
		let (mgr, dir) = manager(1024 * 1024);
		let stats = Stats::default();
		let target = dir.path().join("notes.txt");
		fs::write(&target, vec![b'a'; 100]).unwrap();

		mgr.maybe_backup(&target, Path::new("notes.txt"), 0, &stats);
		mgr.maybe_backup(&target, Path::new("notes.txt"), 0, &stats);

		assert_eq!(stats.snapshot().backups_created, 1, "same-size pre-image retrigger must be suppressed");
	}
}
