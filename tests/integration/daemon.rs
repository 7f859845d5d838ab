#[path = "common/mod.rs"]
mod common;

use std::time::Duration;

use reapd::client::Notifier;
use reapd::protocol::{Action, Frame};
use tempfile::tempdir;

/// Spawns a daemon on a temp socket with a 1s sweep interval.
fn start_daemon(dir: &std::path::Path) -> (common::DaemonGuard, std::path::PathBuf) {
    let socket = common::socket_in(dir);
    let daemon = common::DaemonGuard::spawn(&[
        "--socket",
        socket.to_str().unwrap(),
        "--interval",
        "1",
    ]);
    common::wait_for_socket(&socket);
    (daemon, socket)
}

#[test]
fn ping_is_echoed_back() {
    let temp = tempdir().unwrap();
    let (_daemon, socket) = start_daemon(temp.path());

    let mut notifier = Notifier::connect_to(&socket).unwrap();
    let echoed = notifier.ping(1234, 5678).unwrap();
    assert_eq!(echoed, Frame::new(1234, 5678, Action::Ping));
}

#[test]
fn pings_from_two_clients_stay_separate() {
    let temp = tempdir().unwrap();
    let (_daemon, socket) = start_daemon(temp.path());

    let mut first = Notifier::connect_to(&socket).unwrap();
    let mut second = Notifier::connect_to(&socket).unwrap();

    let a = first.ping(1, 1).unwrap();
    let b = second.ping(2, 2).unwrap();
    assert_eq!(a, Frame::new(1, 1, Action::Ping));
    assert_eq!(b, Frame::new(2, 2, Action::Ping));
}

#[test]
fn orphan_of_dead_parent_is_reaped() {
    let temp = tempdir().unwrap();
    let (_daemon, socket) = start_daemon(temp.path());

    let mut victim = common::spawn_victim();
    let victim_pid = victim.id();
    let parent_pid = common::dead_pid();

    let mut notifier = Notifier::connect_to(&socket).unwrap();
    notifier.register(parent_pid, victim_pid).unwrap();

    // The next sweep should observe the dead parent and signal the victim.
    let reaped = common::wait_until(Duration::from_secs(5), || {
        victim.try_wait().map(|s| s.is_some()).unwrap_or(false)
    });
    assert!(reaped, "victim {victim_pid} was not signaled");
}

#[test]
fn unregistered_child_is_left_alone() {
    let temp = tempdir().unwrap();
    let (_daemon, socket) = start_daemon(temp.path());

    let mut victim = common::spawn_victim();
    let victim_pid = victim.id();
    let parent_pid = common::dead_pid();

    let mut notifier = Notifier::connect_to(&socket).unwrap();
    notifier.register(parent_pid, victim_pid).unwrap();
    notifier.unregister(parent_pid, victim_pid).unwrap();

    // Give the sweep a few intervals to (incorrectly) act.
    std::thread::sleep(Duration::from_millis(2500));
    assert!(
        victim.try_wait().unwrap().is_none(),
        "victim {victim_pid} was signaled despite unregistration"
    );

    victim.kill().unwrap();
    victim.wait().unwrap();
}

#[test]
fn child_of_living_parent_is_left_alone() {
    let temp = tempdir().unwrap();
    let (_daemon, socket) = start_daemon(temp.path());

    let mut victim = common::spawn_victim();
    let victim_pid = victim.id();
    // The test process itself is the living parent.
    let parent_pid = std::process::id();

    let mut notifier = Notifier::connect_to(&socket).unwrap();
    notifier.register(parent_pid, victim_pid).unwrap();

    std::thread::sleep(Duration::from_millis(2500));
    assert!(
        victim.try_wait().unwrap().is_none(),
        "victim {victim_pid} was signaled although its parent is alive"
    );

    victim.kill().unwrap();
    victim.wait().unwrap();
}

#[test]
fn reaping_uses_the_configured_signal() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    let socket = common::socket_in(dir);
    // SIGKILL cannot be caught or ignored, so the victim must vanish.
    let _daemon = common::DaemonGuard::spawn(&[
        "--socket",
        socket.to_str().unwrap(),
        "--interval",
        "1",
        "--signal",
        "9",
    ]);
    common::wait_for_socket(&socket);

    let mut victim = common::spawn_victim();
    let victim_pid = victim.id();
    let parent_pid = common::dead_pid();

    let mut notifier = Notifier::connect_to(&socket).unwrap();
    notifier.register(parent_pid, victim_pid).unwrap();

    let reaped = common::wait_until(Duration::from_secs(5), || {
        victim.try_wait().map(|s| s.is_some()).unwrap_or(false)
    });
    assert!(reaped, "victim {victim_pid} survived SIGKILL sweep");
}

#[test]
fn pipelined_registrations_then_ping() {
    let temp = tempdir().unwrap();
    let (_daemon, socket) = start_daemon(temp.path());

    let mut victims: Vec<_> = (0..3).map(|_| common::spawn_victim()).collect();
    let parent_pid = common::dead_pid();

    // Pipeline several records, then ping to confirm they were all consumed
    // in order before the echo came back.
    let mut notifier = Notifier::connect_to(&socket).unwrap();
    for victim in &victims {
        notifier.register(parent_pid, victim.id()).unwrap();
    }
    let echoed = notifier.ping(parent_pid, 0).unwrap();
    assert_eq!(echoed, Frame::new(parent_pid, 0, Action::Ping));

    for victim in &mut victims {
        let reaped = common::wait_until(Duration::from_secs(5), || {
            victim.try_wait().map(|s| s.is_some()).unwrap_or(false)
        });
        assert!(reaped, "victim {} was not signaled", victim.id());
    }
}
