//! Black-box CLI tests: argument validation and the startup failure modes that
//! don't require an actual FUSE mount (no `fusermount`/root available in CI).

use assert_cmd::Command;
use predicates::prelude::*;

fn sentinelfs() -> Command {
	Command::cargo_bin("sentinelfs").expect("binary built by the workspace")
}

#[test]
fn help_lists_positional_arguments() {
	sentinelfs()
		.arg("--help")
		.assert()
		.success()
		.stdout(predicate::str::contains("storage_path"))
		.stdout(predicate::str::contains("mount_point"));
}

#[test]
fn missing_arguments_is_a_usage_error() {
	sentinelfs().assert().failure();
}

#[test]
fn nonexistent_storage_path_is_rejected() {
	let mount_point = tempfile::tempdir().unwrap();
	sentinelfs()
		.arg("/nonexistent/storage/path/for/sentinelfs/tests")
		.arg(mount_point.path())
		.assert()
		.failure()
		.stderr(predicate::str::contains("storage path"));
}

#[test]
fn nonexistent_mount_point_is_rejected() {
	let storage = tempfile::tempdir().unwrap();
	sentinelfs()
		.arg(storage.path())
		.arg("/nonexistent/mount/point/for/sentinelfs/tests")
		.assert()
		.failure()
		.stderr(predicate::str::contains("mount point"));
}

#[test]
fn nonempty_mount_point_is_rejected() {
	let storage = tempfile::tempdir().unwrap();
	let mount_point = tempfile::tempdir().unwrap();
	std::fs::write(mount_point.path().join("occupied"), b"not empty").unwrap();

	sentinelfs()
		.arg(storage.path())
		.arg(mount_point.path())
		.assert()
		.failure()
		.stderr(predicate::str::contains("not empty"));
}

#[test]
fn entropy_threshold_out_of_range_is_rejected() {
	let storage = tempfile::tempdir().unwrap();
	let mount_point = tempfile::tempdir().unwrap();

	sentinelfs()
		.arg(storage.path())
		.arg(mount_point.path())
		.arg("--entropy-threshold")
		.arg("8.5")
		.assert()
		.failure()
		.stderr(predicate::str::contains("entropy threshold"));
}
