//! Client-side emitter for the daemon's wire protocol.
//!
//! Programs that fork children they cannot wait on, or interposition shims
//! acting on their behalf, use this to tell the daemon about them. The
//! daemon neither knows nor cares how messages arrive; anything that writes
//! conforming records to the socket works. The socket path comes from the
//! `REAPD_SOCKET` environment variable, falling back to the default path.

use std::env;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_SOCKET_PATH;
use crate::protocol::{Action, FRAME_LEN, Frame};

/// Environment variable overriding the daemon socket path.
pub const SOCKET_ENV_VAR: &str = "REAPD_SOCKET";

/// Resolves the daemon socket path from the environment.
pub fn resolve_socket_path() -> PathBuf {
    env::var_os(SOCKET_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// A connection to the daemon for emitting registration messages.
pub struct Notifier {
    stream: UnixStream,
}

impl Notifier {
    /// Connects using the environment-resolved socket path.
    pub fn connect() -> io::Result<Self> {
        Self::connect_to(resolve_socket_path())
    }

    /// Connects to a specific socket path.
    pub fn connect_to(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Notifier {
            stream: UnixStream::connect(path)?,
        })
    }

    /// Announces that `parent` has forked `child`.
    pub fn register(&mut self, parent: u32, child: u32) -> io::Result<()> {
        self.send(Frame::new(parent, child, Action::Register))
    }

    /// Announces that `parent` has waited on `child`.
    pub fn unregister(&mut self, parent: u32, child: u32) -> io::Result<()> {
        self.send(Frame::new(parent, child, Action::Unregister))
    }

    /// Sends a ping and blocks for the echoed record.
    pub fn ping(&mut self, parent: u32, child: u32) -> io::Result<Frame> {
        self.send(Frame::new(parent, child, Action::Ping))?;
        let mut raw = [0u8; FRAME_LEN];
        self.stream.read_exact(&mut raw)?;
        Frame::decode(&raw).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "short ping reply")
        })
    }

    /// Full write of one record; `write_all` retries interrupted writes.
    fn send(&mut self, frame: Frame) -> io::Result<()> {
        self.stream.write_all(&frame.encode())
    }
}
