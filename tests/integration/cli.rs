#[path = "common/mod.rs"]
mod common;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

fn reapd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("reapd"))
}

#[test]
fn help_lists_daemon_flags() {
    reapd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--socket"))
        .stdout(contains("--interval"))
        .stdout(contains("--signal"))
        .stdout(contains("--lockfile"))
        .stdout(contains("--no-start-time-check"));
}

#[test]
fn rejects_zero_interval() {
    reapd()
        .args(["--interval", "0"])
        .assert()
        .failure()
        .stderr(contains("Interval"));
}

#[test]
fn rejects_signal_zero() {
    reapd()
        .args(["--signal", "0"])
        .assert()
        .failure()
        .stderr(contains("Signal"));
}

#[test]
fn rejects_signal_32() {
    reapd()
        .args(["--signal", "32"])
        .assert()
        .failure()
        .stderr(contains("Signal"));
}

#[test]
fn rejects_negative_signal() {
    reapd()
        .args(["--signal", "-9"])
        .assert()
        .failure()
        .stderr(contains("Signal"));
}

#[test]
fn rejects_unknown_log_level() {
    reapd()
        .args(["--log-level", "shouty"])
        .assert()
        .failure();
}

#[test]
fn second_instance_is_refused_while_lock_is_held() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    let lockfile = dir.join("reapd.lock");
    let socket = common::socket_in(dir);

    let _daemon = common::DaemonGuard::spawn(&[
        "--socket",
        socket.to_str().unwrap(),
        "--lockfile",
        lockfile.to_str().unwrap(),
        "--interval",
        "1",
    ]);
    common::wait_for_socket(&socket);

    let other_socket = dir.join("other.sock");
    reapd()
        .args([
            "--socket",
            other_socket.to_str().unwrap(),
            "--lockfile",
            lockfile.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("LockHeld"));
}
