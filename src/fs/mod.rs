//! The stacking filesystem.
//!
//! `SentinelFs` re-exports `config.storage_root` through the mount point, passing
//! almost every operation straight through to the backing directory. The one
//! operation that isn't a passthrough is `write`: every write is routed through the
//! backup manager and then the detector before it's allowed to reach disk.

pub(crate) mod inode;

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write as IoWrite};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
	FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
	ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::{EEXIST, EIO, ENOENT, ENOTDIR, ENOTEMPTY};
use tracing::warn;

use crate::core::{classify::ClassifierHandle, BackupManager, Config, Detector, Stats, Verdict};
use inode::InodeTable;

/// Attribute cache TTL handed back to the kernel. Kept short: SentinelFS needs every
/// write to actually reach the `write` callback, so we don't want the kernel trusting
/// a stale cached size/mtime for long.
const ATTR_TTL: Duration = Duration::from_secs(1);

pub struct SentinelFs {
	config: Config,
	inodes: Mutex<InodeTable>,
	classifier: ClassifierHandle,
	detector: Detector,
	backup: BackupManager,
	stats: Arc<Stats>,
}

impl SentinelFs {
	pub fn new(config: Config, classifier: ClassifierHandle, detector: Detector, backup: BackupManager) -> Self {
		Self {
			config,
			inodes: Mutex::new(InodeTable::new()),
			classifier,
			detector,
			backup,
			stats: Arc::new(Stats::default()),
		}
	}

	/// A shared handle to the write statistics, cloneable before the filesystem is
	/// handed off to `fuser::mount2`/`spawn_mount2` (both of which take it by value),
	/// so the caller can still read a final snapshot after the session ends.
	pub fn stats_handle(&self) -> Arc<Stats> {
		Arc::clone(&self.stats)
	}

	fn rel_path(&self, ino: u64) -> Option<PathBuf> {
		self.inodes.lock().expect("inode table mutex poisoned").path(ino).map(Path::to_path_buf)
	}

	fn backing_path(&self, ino: u64) -> Option<PathBuf> {
		self.rel_path(ino).map(|rel| self.config.storage_root.join(rel))
	}

	fn attr_for(&self, ino: u64, meta: &fs::Metadata) -> FileAttr {
		let kind = if meta.is_dir() {
			FileType::Directory
		} else if meta.file_type().is_symlink() {
			FileType::Symlink
		} else {
			FileType::RegularFile
		};

		FileAttr {
			ino,
			size: meta.len(),
			blocks: meta.blocks(),
			atime: system_time_from_secs(meta.atime(), meta.atime_nsec()),
			mtime: system_time_from_secs(meta.mtime(), meta.mtime_nsec()),
			ctime: system_time_from_secs(meta.ctime(), meta.ctime_nsec()),
			crtime: UNIX_EPOCH,
			kind,
			perm: (meta.permissions().mode() & 0o7777) as u16,
			nlink: meta.nlink() as u32,
			uid: meta.uid(),
			gid: meta.gid(),
			rdev: meta.rdev() as u32,
			blksize: 4096,
			flags: 0,
		}
	}
}

fn system_time_from_secs(secs: i64, nsecs: i64) -> SystemTime {
	if secs >= 0 {
		UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
	} else {
		UNIX_EPOCH - Duration::new((-secs) as u64, 0)
	}
}

impl Filesystem for SentinelFs {
	fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
		let Some(parent_rel) = self.rel_path(parent) else {
			reply.error(ENOENT);
			return;
		};
		let child_rel = parent_rel.join(name);
		let backing = self.config.storage_root.join(&child_rel);

		match fs::symlink_metadata(&backing) {
			Ok(meta) => {
				let ino = self.inodes.lock().expect("inode table mutex poisoned").ino_for(child_rel);
				reply.entry(&ATTR_TTL, &self.attr_for(ino, &meta), 0);
			}
			Err(_) => reply.error(ENOENT),
		}
	}

	fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
		let Some(backing) = self.backing_path(ino) else {
			reply.error(ENOENT);
			return;
		};
		match fs::symlink_metadata(&backing) {
			Ok(meta) => reply.attr(&ATTR_TTL, &self.attr_for(ino, &meta)),
			Err(_) => reply.error(ENOENT),
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn setattr(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		mode: Option<u32>,
		uid: Option<u32>,
		gid: Option<u32>,
		size: Option<u64>,
		_atime: Option<TimeOrNow>,
		_mtime: Option<TimeOrNow>,
		_ctime: Option<SystemTime>,
		_fh: Option<u64>,
		_crtime: Option<SystemTime>,
		_chgtime: Option<SystemTime>,
		_bkuptime: Option<SystemTime>,
		_flags: Option<u32>,
		reply: ReplyAttr,
	) {
		let Some(backing) = self.backing_path(ino) else {
			reply.error(ENOENT);
			return;
		};

		if let Some(mode) = mode {
			if let Err(err) = fs::set_permissions(&backing, fs::Permissions::from_mode(mode)) {
				reply.error(err.raw_os_error().unwrap_or(EIO));
				return;
			}
		}

		if uid.is_some() || gid.is_some() {
			if let Err(err) = std::os::unix::fs::chown(&backing, uid, gid) {
				reply.error(err.raw_os_error().unwrap_or(EIO));
				return;
			}
		}

		if let Some(size) = size {
			match OpenOptions::new().write(true).open(&backing).and_then(|f| f.set_len(size)) {
				Ok(()) => {}
				Err(err) => {
					reply.error(err.raw_os_error().unwrap_or(EIO));
					return;
				}
			}
		}

		match fs::symlink_metadata(&backing) {
			Ok(meta) => reply.attr(&ATTR_TTL, &self.attr_for(ino, &meta)),
			Err(err) => reply.error(err.raw_os_error().unwrap_or(EIO)),
		}
	}

	fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
		let Some(parent_rel) = self.rel_path(parent) else {
			reply.error(ENOENT);
			return;
		};
		let child_rel = parent_rel.join(name);
		let backing = self.config.storage_root.join(&child_rel);

		if let Err(err) = fs::create_dir(&backing) {
			reply.error(err.raw_os_error().unwrap_or(EIO));
			return;
		}
		let _ = fs::set_permissions(&backing, fs::Permissions::from_mode(mode));

		match fs::symlink_metadata(&backing) {
			Ok(meta) => {
				let ino = self.inodes.lock().expect("inode table mutex poisoned").ino_for(child_rel);
				reply.entry(&ATTR_TTL, &self.attr_for(ino, &meta), 0);
			}
			Err(err) => reply.error(err.raw_os_error().unwrap_or(EIO)),
		}
	}

	fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		let Some(parent_rel) = self.rel_path(parent) else {
			reply.error(ENOENT);
			return;
		};
		let child_rel = parent_rel.join(name);
		let backing = self.config.storage_root.join(&child_rel);

		match fs::remove_dir(&backing) {
			Ok(()) => {
				self.inodes.lock().expect("inode table mutex poisoned").remove(&child_rel);
				reply.ok();
			}
			Err(err) => reply.error(match err.raw_os_error() {
				Some(code) => code,
				None => ENOTEMPTY,
			}),
		}
	}

	fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		let Some(parent_rel) = self.rel_path(parent) else {
			reply.error(ENOENT);
			return;
		};
		let child_rel = parent_rel.join(name);
		let backing = self.config.storage_root.join(&child_rel);

		match fs::remove_file(&backing) {
			Ok(()) => {
				self.inodes.lock().expect("inode table mutex poisoned").remove(&child_rel);
				reply.ok();
			}
			Err(err) => reply.error(err.raw_os_error().unwrap_or(ENOENT)),
		}
	}

	fn rename(
		&mut self,
		_req: &Request<'_>,
		parent: u64,
		name: &OsStr,
		newparent: u64,
		newname: &OsStr,
		_flags: u32,
		reply: ReplyEmpty,
	) {
		let (Some(parent_rel), Some(newparent_rel)) = (self.rel_path(parent), self.rel_path(newparent)) else {
			reply.error(ENOENT);
			return;
		};
		let old_rel = parent_rel.join(name);
		let new_rel = newparent_rel.join(newname);
		let old_backing = self.config.storage_root.join(&old_rel);
		let new_backing = self.config.storage_root.join(&new_rel);

		match fs::rename(&old_backing, &new_backing) {
			Ok(()) => {
				self.inodes.lock().expect("inode table mutex poisoned").rename(&old_rel, &new_rel);
				reply.ok();
			}
			Err(err) => reply.error(err.raw_os_error().unwrap_or(EIO)),
		}
	}

	fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
		if self.backing_path(ino).is_none() {
			reply.error(ENOENT);
			return;
		}
		reply.opened(0, flags as u32);
	}

	fn read(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		size: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyData,
	) {
		let Some(backing) = self.backing_path(ino) else {
			reply.error(ENOENT);
			return;
		};

		let mut file = match File::open(&backing) {
			Ok(f) => f,
			Err(err) => {
				reply.error(err.raw_os_error().unwrap_or(ENOENT));
				return;
			}
		};

		if let Err(err) = file.seek(SeekFrom::Start(offset.max(0) as u64)) {
			reply.error(err.raw_os_error().unwrap_or(EIO));
			return;
		}

		let mut buf = vec![0u8; size as usize];
		match file.read(&mut buf) {
			Ok(n) => reply.data(&buf[..n]),
			Err(err) => reply.error(err.raw_os_error().unwrap_or(EIO)),
		}
	}

	/// Every write is routed through the backup manager and then the detector before
	/// it is allowed to touch the backing file. A blocked write never reaches disk:
	/// the application sees `EIO`, exactly as if the underlying storage had failed.
	#[allow(clippy::too_many_arguments)]
	fn write(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		data: &[u8],
		_write_flags: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyWrite,
	) {
		let Some(rel) = self.rel_path(ino) else {
			reply.error(ENOENT);
			return;
		};
		let backing = self.config.storage_root.join(&rel);

		self.backup.maybe_backup(&backing, &rel, offset, &self.stats);

		let label = self.classifier.classify(data);
		let decision = self.detector.evaluate(data, label, &self.stats);
		if decision.verdict == Verdict::Block {
			warn!(path = %rel.display(), "blocked write surfaced to caller as EIO");
			reply.error(EIO);
			return;
		}

		let mut file = match OpenOptions::new().write(true).open(&backing) {
			Ok(f) => f,
			Err(err) => {
				reply.error(err.raw_os_error().unwrap_or(EIO));
				return;
			}
		};
		if let Err(err) = file.seek(SeekFrom::Start(offset.max(0) as u64)) {
			reply.error(err.raw_os_error().unwrap_or(EIO));
			return;
		}
		match file.write_all(data) {
			Ok(()) => reply.written(data.len() as u32),
			Err(err) => reply.error(err.raw_os_error().unwrap_or(EIO)),
		}
	}

	fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
		reply.ok();
	}

	fn release(
		&mut self,
		_req: &Request<'_>,
		_ino: u64,
		_fh: u64,
		_flags: i32,
		_lock_owner: Option<u64>,
		_flush: bool,
		reply: ReplyEmpty,
	) {
		reply.ok();
	}

	fn fsync(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
		let Some(backing) = self.backing_path(ino) else {
			reply.error(ENOENT);
			return;
		};
		match File::open(&backing).and_then(|f| f.sync_all()) {
			Ok(()) => reply.ok(),
			Err(err) => reply.error(err.raw_os_error().unwrap_or(EIO)),
		}
	}

	fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
		if self.backing_path(ino).is_none() {
			reply.error(ENOENT);
			return;
		}
		reply.opened(0, flags as u32);
	}

	fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
		let Some(rel) = self.rel_path(ino) else {
			reply.error(ENOENT);
			return;
		};
		let backing = self.config.storage_root.join(&rel);

		let read_dir = match fs::read_dir(&backing) {
			Ok(rd) => rd,
			Err(err) => {
				reply.error(err.raw_os_error().unwrap_or(ENOTDIR));
				return;
			}
		};

		let mut entries: Vec<(u64, FileType, std::ffi::OsString)> =
			vec![(ino, FileType::Directory, ".".into()), (ino, FileType::Directory, "..".into())];

		for entry in read_dir.flatten() {
			let name = entry.file_name();
			let child_rel = rel.join(&name);
			let kind = match entry.file_type() {
				Ok(ft) if ft.is_dir() => FileType::Directory,
				Ok(ft) if ft.is_symlink() => FileType::Symlink,
				_ => FileType::RegularFile,
			};
			let child_ino = self.inodes.lock().expect("inode table mutex poisoned").ino_for(child_rel);
			entries.push((child_ino, kind, name));
		}

		for (i, (child_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
			if reply.add(child_ino, (i + 1) as i64, kind, name) {
				break;
			}
		}
		reply.ok();
	}

	fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
		reply.ok();
	}

	fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
		reply.statfs(0, 0, 0, 0, 0, 4096, 255, 0);
	}

	fn create(
		&mut self,
		_req: &Request<'_>,
		parent: u64,
		name: &OsStr,
		mode: u32,
		_umask: u32,
		flags: i32,
		reply: ReplyCreate,
	) {
		let Some(parent_rel) = self.rel_path(parent) else {
			reply.error(ENOENT);
			return;
		};
		let child_rel = parent_rel.join(name);
		let backing = self.config.storage_root.join(&child_rel);

		let open_result = OpenOptions::new().write(true).create_new(true).open(&backing);
		let file = match open_result {
			Ok(f) => f,
			Err(err) => {
				reply.error(err.raw_os_error().unwrap_or(EEXIST));
				return;
			}
		};
		let _ = file.set_permissions(fs::Permissions::from_mode(mode));
		drop(file);

		match fs::symlink_metadata(&backing) {
			Ok(meta) => {
				let ino = self.inodes.lock().expect("inode table mutex poisoned").ino_for(child_rel);
				reply.created(&ATTR_TTL, &self.attr_for(ino, &meta), 0, 0, flags as u32);
			}
			Err(err) => reply.error(err.raw_os_error().unwrap_or(EIO)),
		}
	}

	fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
		match self.backing_path(ino) {
			Some(p) if p.exists() => reply.ok(),
			_ => reply.error(ENOENT),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::{Detector, DEFAULT_ENTROPY_THRESHOLD};
	use tempfile::tempdir;

	fn fixture() -> (SentinelFs, tempfile::TempDir) {
		let dir = tempdir().unwrap();
		let config = Config::new(dir.path().to_path_buf(), DEFAULT_ENTROPY_THRESHOLD, 1024 * 1024);
		let backup = BackupManager::new(config.backup_root.clone(), config.backup_size_limit);
		backup.ensure_backup_dir().unwrap();
		let detector = Detector::new(config.entropy_threshold);
		let classifier = ClassifierHandle::new();
		let fs = SentinelFs::new(config, classifier, detector, backup);
		(fs, dir)
	}

	#[test]
	fn root_resolves_to_storage_root() {
		let (fs, dir) = fixture();
		assert_eq!(fs.backing_path(inode::ROOT_INO), Some(dir.path().to_path_buf()));
	}

	#[test]
	fn rel_path_for_unknown_inode_is_none() {
		let (fs, _dir) = fixture();
		assert_eq!(fs.rel_path(9999), None);
	}
}
