//! Non-blocking socket multiplexing for the daemon.
//!
//! One listening unix socket plus every client connection are driven from a
//! single thread with `select(2)`. Connections live in a [`HashTable`] keyed
//! by file descriptor; each owns a receive and a send buffer. All socket I/O
//! is non-blocking, so no client can stall the loop, and the readiness wait
//! is bounded by the caller-supplied timeout (the time until the next sweep).

use std::fs;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::ptr;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::DaemonError;
use crate::protocol::{Action, Frame, FRAME_LEN, IoBuffer};
use crate::registry::{ProcessProbe, Registry};
use crate::table::{HashTable, Key};

/// Bucket count of the connection registry.
const CONNECTION_BUCKET_COUNT: usize = 1023;

/// Safe handle on a `libc::fd_set`.
#[derive(Clone, Copy)]
struct FdSet(libc::fd_set);

impl FdSet {
    fn new() -> Self {
        unsafe {
            let mut raw = mem::MaybeUninit::<libc::fd_set>::zeroed();
            libc::FD_ZERO(raw.as_mut_ptr());
            FdSet(raw.assume_init())
        }
    }

    fn insert(&mut self, fd: RawFd) {
        unsafe { libc::FD_SET(fd, &mut self.0) }
    }

    fn remove(&mut self, fd: RawFd) {
        unsafe { libc::FD_CLR(fd, &mut self.0) }
    }

    fn contains(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }
}

/// One client connection: the socket plus its framing buffers.
struct Connection {
    stream: UnixStream,
    rcv: IoBuffer,
    snd: IoBuffer,
}

impl Connection {
    fn new(stream: UnixStream) -> Self {
        Connection {
            stream,
            rcv: IoBuffer::new(),
            snd: IoBuffer::new(),
        }
    }

    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Readiness reported for one connection this iteration.
#[derive(Clone, Copy, Default)]
struct SockEvents {
    read: bool,
    write: bool,
}

/// What servicing a connection concluded.
#[derive(Clone, Copy, Default)]
struct SockOutcome {
    /// The connection hit an unrecoverable error or orderly close.
    error: bool,
    /// Unsent bytes remain buffered; keep write-readiness interest.
    want_write: bool,
}

/// The daemon's I/O layer: listener, connection registry, readiness sets.
pub struct EventLoop {
    listener: UnixListener,
    conns: HashTable<Option<Box<Connection>>>,
    read_interest: FdSet,
    write_interest: FdSet,
    /// Cached highest fd; `None` after any connection add/remove.
    max_fd: Option<RawFd>,
}

impl EventLoop {
    /// Binds the listening socket at `path`, unlinking any prior socket
    /// there first. `UnixListener::bind` listens with a backlog of 128.
    pub fn bind(path: &Path) -> Result<Self, DaemonError> {
        if let Err(err) = fs::remove_file(path)
            && err.kind() != io::ErrorKind::NotFound
        {
            return Err(DaemonError::SocketSetup {
                path: path.to_path_buf(),
                source: err,
            });
        }

        let setup_err = |source| DaemonError::SocketSetup {
            path: path.to_path_buf(),
            source,
        };
        let listener = UnixListener::bind(path).map_err(setup_err)?;
        listener.set_nonblocking(true).map_err(setup_err)?;

        let mut read_interest = FdSet::new();
        read_interest.insert(listener.as_raw_fd());

        Ok(EventLoop {
            listener,
            conns: HashTable::new(CONNECTION_BUCKET_COUNT),
            read_interest,
            write_interest: FdSet::new(),
            max_fd: None,
        })
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.conns.stats().items
    }

    /// Runs one multiplexing iteration: wait for readiness (at most
    /// `timeout`), service every ready connection, then accept at most one
    /// pending connection if any of the reported events remain unconsumed.
    ///
    /// An interrupted wait is retried transparently. Any other wait failure
    /// is returned to the caller, which logs it and abandons the iteration.
    pub fn iterate<P: ProcessProbe>(
        &mut self,
        timeout: Duration,
        registry: &mut Registry,
        probe: &P,
    ) -> io::Result<()> {
        let EventLoop {
            listener,
            conns,
            read_interest,
            write_interest,
            max_fd,
        } = self;

        let nfds = {
            let cached = match max_fd {
                Some(fd) => *fd,
                None => {
                    let mut highest = listener.as_raw_fd();
                    for (_, conn) in conns.iter() {
                        if let Some(conn) = conn {
                            highest = highest.max(conn.fd());
                        }
                    }
                    *max_fd = Some(highest);
                    highest
                }
            };
            cached + 1
        };

        let mut rd = *read_interest;
        let mut wr = *write_interest;
        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };

        let nevents = loop {
            let rc = unsafe {
                libc::select(nfds, &mut rd.0, &mut wr.0, ptr::null_mut(), &mut tv)
            };
            if rc >= 0 {
                break rc;
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                // Retry the same wait; tv already carries the remaining time.
                rd = *read_interest;
                wr = *write_interest;
                continue;
            }
            return Err(err);
        };

        if nevents == 0 {
            return Ok(());
        }
        let mut pending = nevents as usize;

        let mut cursor = conns.cursor();
        while pending > 0 && cursor.advance() {
            let Some(conn) = cursor.value_mut().as_deref_mut() else {
                debug_assert!(false, "connection slot without a record");
                continue;
            };
            let fd = conn.fd();

            let mut events = SockEvents::default();
            if rd.contains(fd) {
                pending -= 1;
                events.read = true;
            }
            if wr.contains(fd) {
                pending -= 1;
                events.write = true;
            }
            if !events.read && !events.write {
                continue;
            }

            let outcome = service_connection(conn, events, registry, probe);

            if outcome.error {
                read_interest.remove(fd);
                write_interest.remove(fd);
                if *max_fd == Some(fd) {
                    *max_fd = None;
                }
                info!("closing connection on fd {fd}");
                cursor.remove_current();
                continue;
            }

            if outcome.want_write {
                write_interest.insert(fd);
            } else {
                write_interest.remove(fd);
            }
        }
        drop(cursor);

        if pending > 0 && rd.contains(listener.as_raw_fd()) {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!("couldn't make accepted socket non-blocking: {err}");
                    } else {
                        let fd = stream.as_raw_fd();
                        let slot = conns.entry(Key::Int(fd as u32));
                        *slot = Some(Box::new(Connection::new(stream)));
                        read_interest.insert(fd);
                        *max_fd = None;
                        debug!("accepted connection on fd {fd}");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => error!("accept failed: {err}"),
            }
        }

        Ok(())
    }
}

/// Performs the non-blocking I/O a readiness report allows: flush buffered
/// send bytes, then drain the socket into the receive buffer and dispatch
/// every complete frame.
fn service_connection<P: ProcessProbe>(
    conn: &mut Connection,
    events: SockEvents,
    registry: &mut Registry,
    probe: &P,
) -> SockOutcome {
    let mut outcome = SockOutcome::default();
    let fd = conn.fd();

    if events.write {
        let mut written = 0;
        while written < conn.snd.len() {
            match conn.stream.write(&conn.snd.filled()[written..]) {
                Ok(0) => {
                    info!("fd {fd} closed the connection");
                    outcome.error = true;
                    break;
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("fd {fd} send: {err}");
                    outcome.error = true;
                    break;
                }
            }
        }
        conn.snd.consume(written);
    }

    if events.read {
        loop {
            let dst = conn.rcv.unfilled();
            if dst.is_empty() {
                break;
            }
            match conn.stream.read(dst) {
                Ok(0) => {
                    debug!("fd {fd} closed the connection");
                    outcome.error = true;
                    break;
                }
                Ok(n) => conn.rcv.commit(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("fd {fd} recv: {err}");
                    outcome.error = true;
                    break;
                }
            }
        }

        let mut consumed = 0;
        while let Some(frame) = Frame::decode(&conn.rcv.filled()[consumed..]) {
            consumed += FRAME_LEN;
            dispatch(conn, &frame, registry, probe);
        }

        if consumed == 0 && conn.rcv.is_full() {
            // A full buffer holding no complete record can never make
            // progress; the peer is not speaking the protocol.
            error!("fd {fd}: receive buffer full without a complete record");
            outcome.error = true;
        }
        conn.rcv.consume(consumed);
    }

    if !conn.snd.is_empty() {
        outcome.want_write = true;
    }
    outcome
}

/// Routes one decoded frame.
fn dispatch<P: ProcessProbe>(
    conn: &mut Connection,
    frame: &Frame,
    registry: &mut Registry,
    probe: &P,
) {
    debug!("fd {}: {frame}", conn.fd());
    match frame.action() {
        Some(Action::Register) => registry.register(frame.parent, frame.child, probe),
        Some(Action::Unregister) => registry.unregister(frame.parent, frame.child),
        Some(Action::Ping) => {
            if !conn.snd.append(&frame.encode()) {
                error!("fd {}: no room in send buffer for ping reply", conn.fd());
            }
        }
        None => {
            error!("received unknown action code {:#x} ({frame})", frame.action);
        }
    }
}
