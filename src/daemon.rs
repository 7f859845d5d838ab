//! Daemon assembly: the server context and its run loop.
//!
//! A [`Server`] owns everything the daemon touches (configuration, the
//! parent/child registry, the I/O event loop, and the process probe) and is
//! passed explicitly wherever state is needed; there are no process-wide
//! singletons. The run loop interleaves I/O iterations with sweeps: the
//! readiness wait is bounded by the time remaining until the next sweep
//! deadline, so a sweep never runs during socket I/O and an idle daemon
//! wakes at most once per interval.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::Instant;

use fs2::FileExt;
use nix::sys::signal::{self, SigHandler, Signal};
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::io::EventLoop;
use crate::registry::{Registry, Sweeper, SystemProbe};

/// The daemon's single top-level context.
pub struct Server {
    config: DaemonConfig,
    registry: Registry,
    event_loop: EventLoop,
    sweeper: Sweeper,
    probe: SystemProbe,
    /// Keeps the exclusive lock for the daemon's lifetime.
    _lock: Option<File>,
}

impl Server {
    /// Builds a server from a validated configuration: takes the instance
    /// lock (if configured), binds the listening socket, and ignores SIGPIPE
    /// so writes to dead clients surface as errors instead of killing the
    /// daemon.
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        let lock = match &config.lockfile {
            Some(path) => Some(acquire_instance_lock(path)?),
            None => None,
        };

        let event_loop = EventLoop::bind(&config.socket_path)?;

        unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }?;

        Ok(Server {
            registry: Registry::new(config.check_start_time),
            event_loop,
            sweeper: Sweeper::new(config.reap_signal),
            probe: SystemProbe,
            config,
            _lock: lock,
        })
    }

    /// Shared view of the registry, for inspection.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.event_loop.connection_count()
    }

    /// Runs the daemon until the process is terminated.
    pub fn run(&mut self) -> Result<(), DaemonError> {
        info!(
            "listening on {:?}; sweeping every {:?}, reap signal {:?}",
            self.config.socket_path, self.config.sweep_interval, self.config.reap_signal
        );

        let mut deadline = Instant::now() + self.config.sweep_interval;
        loop {
            deadline = self.tick(deadline);
        }
    }

    /// One run-loop cycle: an I/O iteration bounded by the sweep deadline,
    /// then a sweep if the deadline has passed. A failed readiness wait
    /// abandons the whole cycle, sweep included.
    ///
    /// Returns the (possibly re-armed) sweep deadline.
    pub fn tick(&mut self, deadline: Instant) -> Instant {
        let timeout = deadline.saturating_duration_since(Instant::now());
        if let Err(err) = self
            .event_loop
            .iterate(timeout, &mut self.registry, &self.probe)
        {
            error!("readiness wait failed: {err}");
            return deadline;
        }

        if Instant::now() >= deadline {
            self.sweeper.sweep(&mut self.registry, &self.probe);
            return Instant::now() + self.config.sweep_interval;
        }
        deadline
    }
}

/// Opens `path` and takes a non-blocking exclusive lock on it. The lock is
/// released by the kernel when the file handle closes, so a crashed daemon
/// never wedges the next one.
fn acquire_instance_lock(path: &Path) -> Result<File, DaemonError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| DaemonError::LockOpen {
            path: path.to_path_buf(),
            source,
        })?;

    file.try_lock_exclusive()
        .map_err(|_| DaemonError::LockHeld {
            path: path.to_path_buf(),
        })?;
    Ok(file)
}
