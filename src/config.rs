//! Daemon configuration, derived from command-line flags and validated
//! before the event loop starts.

use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::cli::Cli;
use crate::error::DaemonError;

/// Socket path used when `--socket` is not given.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/reapd.sock";

/// Sweep interval used when `--interval` is not given.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 2;

/// Signal delivered to orphans when `--signal` is not given.
pub const DEFAULT_REAP_SIGNAL: Signal = Signal::SIGINT;

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Filesystem path of the listening socket.
    pub socket_path: PathBuf,
    /// Time between orphan sweeps.
    pub sweep_interval: Duration,
    /// Signal delivered to confirmed orphans.
    pub reap_signal: Signal,
    /// Optional lock file enforcing single-instance operation.
    pub lockfile: Option<PathBuf>,
    /// Whether children are fenced by start-time token before signaling.
    pub check_start_time: bool,
}

impl DaemonConfig {
    /// Validates CLI arguments into a configuration.
    ///
    /// The sweep interval must be at least one second and the signal number
    /// must name a real signal in `1..=31`; anything else is rejected before
    /// the daemon touches the filesystem.
    pub fn from_cli(cli: &Cli) -> Result<Self, DaemonError> {
        if cli.interval < 1 {
            return Err(DaemonError::InvalidInterval(cli.interval));
        }

        if !(1..=31).contains(&cli.signal) {
            return Err(DaemonError::InvalidSignal(cli.signal));
        }
        let reap_signal = Signal::try_from(cli.signal)
            .map_err(|_| DaemonError::InvalidSignal(cli.signal))?;

        Ok(DaemonConfig {
            socket_path: cli.socket.clone(),
            sweep_interval: Duration::from_secs(cli.interval),
            reap_signal,
            lockfile: cli.lockfile.clone(),
            check_start_time: !cli.no_start_time_check,
        })
    }
}
