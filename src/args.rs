use std::path::PathBuf;

use clap::Parser;
use lloggs::{LoggingArgs, PreArgs, WorkerGuard};
use miette::{miette, Result};
use tracing::debug;

use crate::core::{DEFAULT_BACKUP_SIZE_LIMIT, DEFAULT_ENTROPY_THRESHOLD};

/// SentinelFS: a stacking FUSE filesystem that detects in-progress ransomware encryption.
///
/// SentinelFS re-exports a backing directory through a mount point. Every write that
/// passes through the mount is classified as allowed or blocked in real time: a block
/// is surfaced to the writing application as a plain I/O error, before any ciphertext
/// reaches the backing store. The first time a file is modified after mount, its prior
/// contents are opportunistically copied into a backup directory under the backing
/// store, so a write that looks legitimate but is only retroactively suspected as
/// malicious can in principle be recovered.
#[derive(Debug, Clone, Parser)]
#[command(
	author,
	version,
	long_version = format!("{} built from branch={} commit={} dirty={} source_timestamp={}",
		env!("CARGO_PKG_VERSION"),
		env!("GIT_BRANCH"),
		env!("GIT_COMMIT"),
		env!("GIT_DIRTY"),
		env!("SOURCE_TIMESTAMP"),
	),
	after_help = "Want more detail? Try the long '--help' flag!",
	after_long_help = "Didn't expect this much output? Use the short '-h' flag to get short help.",
)]
#[cfg_attr(debug_assertions, command(before_help = "⚠ DEBUG BUILD ⚠"))]
pub struct Args {
	#[command(flatten)]
	pub logging: LoggingArgs,

	/// Path to the backing directory whose contents are re-exported through the mount.
	///
	/// Created if it does not already exist. Must be a real directory on local
	/// storage; SentinelFS does not support mounting over a network filesystem or
	/// another FUSE mount.
	pub storage_path: PathBuf,

	/// Path to the mount point.
	///
	/// Must exist and be empty. The mount point's kernel-side attribute cache is
	/// disabled so that every read/write produces a FUSE callback, which is required
	/// for real-time write interception.
	pub mount_point: PathBuf,

	/// Shannon-entropy threshold above which a non-whitelisted write is blocked.
	///
	/// Must be in (0, 8). A write whose buffer entropy is strictly greater than this
	/// value is blocked; a write at exactly the threshold is allowed.
	#[arg(long, default_value_t = DEFAULT_ENTROPY_THRESHOLD)]
	pub entropy_threshold: f64,

	/// Maximum pre-image size, in bytes, that will be backed up.
	///
	/// A file larger than this at the moment of its first write after mount is never
	/// backed up; the write still proceeds to the detector.
	#[arg(long, default_value_t = DEFAULT_BACKUP_SIZE_LIMIT)]
	pub backup_size_limit: u64,

	/// Run in the foreground instead of daemonizing.
	#[arg(long)]
	pub foreground: bool,

	/// Allow other users (including root) to access the mount.
	///
	/// Passed through to the FUSE kernel module as the `allow_other` mount option;
	/// usually requires `user_allow_other` in `/etc/fuse.conf`.
	#[arg(long)]
	pub allow_other: bool,

	/// Extra raw FUSE mount options, passed through verbatim (e.g. `-o ro,noexec`).
	#[arg(long = "mount-option", short = 'o', value_name = "OPTION")]
	pub mount_options: Vec<String>,
}

pub fn get_args() -> Result<(Args, WorkerGuard)> {
	let log_guard = PreArgs::parse().setup().map_err(|err| miette!("{err}"))?;

	debug!("parsing arguments");
	let args = Args::parse();

	let log_guard = match log_guard {
		Some(g) => g,
		None => args
			.logging
			.setup(|v| match v {
				0 => "info",
				1 => "info,sentinelfs=debug",
				2 => "debug",
				3 => "debug,sentinelfs=trace",
				_ => "trace",
			})
			.map_err(|err| miette!("{err}"))?,
	};

	debug!(?args, "got arguments");
	Ok((args, log_guard))
}
