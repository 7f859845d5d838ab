//! Wire protocol framing and per-connection byte buffers.
//!
//! Clients speak fixed 12-byte records: three host-endian `u32` fields in the
//! order `(parent_pid, child_pid, action)`. Records may be pipelined in a
//! single write and may arrive arbitrarily fragmented; partial records stay
//! buffered until the remaining bytes arrive.

use std::fmt;

/// Size of one wire record.
pub const FRAME_LEN: usize = 12;

/// Capacity of each connection's receive and send buffer.
pub const BUF_CAPACITY: usize = 4096;

/// Protocol actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Register a parent→child relationship.
    Register,
    /// Remove a previously registered relationship.
    Unregister,
    /// Echo the record back to the sender.
    Ping,
}

impl Action {
    /// Wire code for this action.
    pub fn code(self) -> u32 {
        match self {
            Action::Register => 1,
            Action::Unregister => 2,
            Action::Ping => 3,
        }
    }

    /// Decodes a wire code. Unknown codes yield `None`; the caller logs and
    /// ignores them without dropping the connection.
    pub fn from_code(code: u32) -> Option<Action> {
        match code {
            1 => Some(Action::Register),
            2 => Some(Action::Unregister),
            3 => Some(Action::Ping),
            _ => None,
        }
    }
}

/// One decoded wire record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Registering parent PID.
    pub parent: u32,
    /// Child PID the message concerns.
    pub child: u32,
    /// Raw action code; see [`Action::from_code`].
    pub action: u32,
}

impl Frame {
    /// Builds a frame for a known action.
    pub fn new(parent: u32, child: u32, action: Action) -> Self {
        Frame {
            parent,
            child,
            action: action.code(),
        }
    }

    /// The frame's action, if the code is known.
    pub fn action(&self) -> Option<Action> {
        Action::from_code(self.action)
    }

    /// Encodes the frame in host byte order.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0..4].copy_from_slice(&self.parent.to_ne_bytes());
        out[4..8].copy_from_slice(&self.child.to_ne_bytes());
        out[8..12].copy_from_slice(&self.action.to_ne_bytes());
        out
    }

    /// Decodes one frame from the front of `bytes`, or `None` if fewer than
    /// [`FRAME_LEN`] bytes are available.
    pub fn decode(bytes: &[u8]) -> Option<Frame> {
        if bytes.len() < FRAME_LEN {
            return None;
        }
        let field = |range: std::ops::Range<usize>| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[range]);
            u32::from_ne_bytes(raw)
        };
        Some(Frame {
            parent: field(0..4),
            child: field(4..8),
            action: field(8..12),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parent={} child={} action={:#x}",
            self.parent, self.child, self.action
        )
    }
}

/// Fixed-capacity byte buffer with front compaction.
///
/// The producer appends at `used`; the consumer drains complete records from
/// the front, after which the unconsumed tail is moved back to offset zero.
pub struct IoBuffer {
    used: usize,
    data: Box<[u8; BUF_CAPACITY]>,
}

impl IoBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        IoBuffer {
            used: 0,
            data: Box::new([0u8; BUF_CAPACITY]),
        }
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.used
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Returns `true` if no free space remains.
    pub fn is_full(&self) -> bool {
        self.used == BUF_CAPACITY
    }

    /// The buffered bytes.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// The writable tail of the buffer.
    pub fn unfilled(&mut self) -> &mut [u8] {
        &mut self.data[self.used..]
    }

    /// Marks `n` bytes of the writable tail as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.used + n <= BUF_CAPACITY);
        self.used += n;
    }

    /// Drains `n` bytes from the front, compacting the remainder to offset
    /// zero.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.used);
        if n == 0 {
            return;
        }
        self.data.copy_within(n..self.used, 0);
        self.used -= n;
    }

    /// Appends `bytes`, or returns `false` without writing anything if the
    /// free space is insufficient.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if BUF_CAPACITY - self.used < bytes.len() {
            return false;
        }
        self.data[self.used..self.used + bytes.len()].copy_from_slice(bytes);
        self.used += bytes.len();
        true
    }
}

impl Default for IoBuffer {
    fn default() -> Self {
        IoBuffer::new()
    }
}
