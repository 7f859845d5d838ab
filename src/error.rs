//! Error handling for reapd.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use crate::procstat::ProcStatError;

/// Defines all possible errors that can occur while configuring and running
/// the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The sweep interval was below the minimum.
    #[error("invalid sweep interval {0}: must be >= 1 second")]
    InvalidInterval(u64),

    /// The reaping signal number was outside the valid range.
    #[error("invalid signal number {0}: must be within 1..=31")]
    InvalidSignal(i32),

    /// Error setting up the listening socket.
    #[error("failed to set up listening socket at {path:?}: {source}")]
    SocketSetup {
        /// Path the daemon attempted to bind.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error opening the lock file.
    #[error("failed to open lock file {path:?}: {source}")]
    LockOpen {
        /// The lock file path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Another daemon instance holds the lock file.
    #[error("lock file {path:?} is held; is another instance running?")]
    LockHeld {
        /// The lock file path.
        path: PathBuf,
    },

    /// Error installing a signal disposition.
    #[error("failed to set signal disposition: {0}")]
    SignalSetup(#[from] nix::errno::Errno),

    /// Generic I/O error during daemon setup.
    #[error("daemon I/O error: {0}")]
    Io(#[from] io::Error),
}
