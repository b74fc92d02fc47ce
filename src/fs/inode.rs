//! Inode-to-path translation.
//!
//! FUSE addresses files by inode number; the backing store addresses them by path.
//! This table is the bridge: every inode the kernel has been told about maps back to
//! a path relative to the storage root, and the table is the only place that mapping
//! is allowed to live.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The inode FUSE uses for the mount's root directory.
pub const ROOT_INO: u64 = 1;

#[derive(Debug)]
pub struct InodeTable {
	next_ino: u64,
	path_to_ino: HashMap<PathBuf, u64>,
	ino_to_path: HashMap<u64, PathBuf>,
}

impl Default for InodeTable {
	fn default() -> Self {
		let mut ino_to_path = HashMap::new();
		let mut path_to_ino = HashMap::new();
		ino_to_path.insert(ROOT_INO, PathBuf::new());
		path_to_ino.insert(PathBuf::new(), ROOT_INO);
		Self {
			next_ino: 2,
			path_to_ino,
			ino_to_path,
		}
	}
}

impl InodeTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Looks up the relative path for a known inode.
	pub fn path(&self, ino: u64) -> Option<&Path> {
		self.ino_to_path.get(&ino).map(PathBuf::as_path)
	}

	/// Returns the inode for `rel_path`, allocating a fresh one if this is the first
	/// time the path has been seen.
	pub fn ino_for(&mut self, rel_path: PathBuf) -> u64 {
		if let Some(&ino) = self.path_to_ino.get(&rel_path) {
			return ino;
		}
		let ino = self.next_ino;
		self.next_ino += 1;
		self.path_to_ino.insert(rel_path.clone(), ino);
		self.ino_to_path.insert(ino, rel_path);
		ino
	}

	/// Returns the already-allocated inode for `rel_path`, if any, without
	/// allocating a new one.
	pub fn existing_ino(&self, rel_path: &Path) -> Option<u64> {
		self.path_to_ino.get(rel_path).copied()
	}

	/// Updates the table after a successful rename, moving every entry rooted at
	/// `old_path` (the entry itself, and, for a directory, its descendants) to the
	/// equivalent path rooted at `new_path`.
	pub fn rename(&mut self, old_path: &Path, new_path: &Path) {
		let affected: Vec<PathBuf> = self
			.path_to_ino
			.keys()
			.filter(|p| *p == old_path || p.starts_with(old_path))
			.cloned()
			.collect();

		for path in affected {
			let ino = self.path_to_ino.remove(&path).expect("key came from this map");
			let rest = path.strip_prefix(old_path).expect("filtered by starts_with above");
			let moved = new_path.join(rest);
			self.ino_to_path.insert(ino, moved.clone());
			self.path_to_ino.insert(moved, ino);
		}
	}

	/// Drops the mapping for `rel_path` entirely, e.g. after `unlink`/`rmdir`.
	pub fn remove(&mut self, rel_path: &Path) {
		if let Some(ino) = self.path_to_ino.remove(rel_path) {
			self.ino_to_path.remove(&ino);
		}
	}
}
