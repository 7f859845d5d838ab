#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal;
use nix::unistd::Pid;

/// A running reapd instance that is killed when the guard drops.
pub struct DaemonGuard {
    child: Child,
}

impl DaemonGuard {
    pub fn spawn(args: &[&str]) -> Self {
        let child = Command::new(assert_cmd::cargo::cargo_bin!("reapd"))
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn reapd");
        DaemonGuard { child }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Spawns a long-running victim process the tests can register and reap.
pub fn spawn_victim() -> Child {
    Command::new("sleep")
        .arg("30")
        .stdout(Stdio::null())
        .spawn()
        .expect("failed to spawn sleep")
}

/// Spawns a short-lived process, waits for it, and returns its now-dead PID.
pub fn dead_pid() -> u32 {
    let mut child = Command::new("true")
        .spawn()
        .expect("failed to spawn true");
    let pid = child.id();
    child.wait().expect("failed to wait on child");
    pid
}

pub fn is_process_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn wait_for_socket(path: &Path) {
    assert!(
        wait_until(Duration::from_secs(5), || path.exists()),
        "timed out waiting for socket {:?}",
        path
    );
}

/// Polls `pred` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Temp-dir socket path helper.
pub fn socket_in(dir: &Path) -> PathBuf {
    dir.join("reapd.sock")
}
