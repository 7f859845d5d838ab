//! Process metadata queries against `/proc/<pid>/stat`.
//!
//! The daemon needs one fact about a process: the time it started, measured
//! in clock ticks since boot. The kernel assigns it at creation and never
//! changes it, which makes it a cheap fence against PID reuse: a recycled PID
//! belongs to a different process exactly when its start time differs from
//! the one recorded at registration.

use std::{fs, io};

use thiserror::Error;

/// `starttime` is field 22 of the stat record; fields 1 and 2 (pid, comm)
/// sit before the closing parenthesis we anchor the parse on.
const STARTTIME_FIELD: usize = 19;

/// Errors raised while querying process metadata.
#[derive(Debug, Error)]
pub enum ProcStatError {
    /// The process does not exist (or exited before the read).
    #[error("process {0} not found")]
    NotFound(u32),

    /// The stat record could not be read.
    #[error("failed to read stat record for pid {pid}: {source}")]
    Read {
        /// PID whose record was queried.
        pid: u32,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The stat record did not parse.
    #[error("malformed stat record for pid {0}")]
    Malformed(u32),
}

/// The subset of the per-process stat record the daemon cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStat {
    /// Process ID the record describes.
    pub pid: u32,
    /// Single-character scheduler state (`R`, `S`, `Z`, ...).
    pub state: char,
    /// Parent process ID as reported by the kernel.
    pub ppid: u32,
    /// Process start time in clock ticks since boot.
    pub start_time: u64,
}

/// Reads and parses `/proc/<pid>/stat`.
///
/// The read is a single small file; it never blocks the event loop for
/// unbounded time.
pub fn query(pid: u32) -> Result<ProcessStat, ProcStatError> {
    let path = format!("/proc/{pid}/stat");
    let contents = fs::read_to_string(&path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ProcStatError::NotFound(pid)
        } else {
            ProcStatError::Read { pid, source: err }
        }
    })?;
    parse(pid, &contents)
}

/// Parses the stat record body. The executable name (field 2) may contain
/// spaces and parentheses, so the parse anchors on the *last* `)` and splits
/// the rest on whitespace.
fn parse(pid: u32, contents: &str) -> Result<ProcessStat, ProcStatError> {
    let close = contents
        .rfind(')')
        .ok_or(ProcStatError::Malformed(pid))?;
    let fields: Vec<&str> = contents[close + 1..].split_whitespace().collect();

    let state = fields
        .first()
        .and_then(|s| s.chars().next())
        .ok_or(ProcStatError::Malformed(pid))?;
    let ppid = fields
        .get(1)
        .and_then(|s| s.parse().ok())
        .ok_or(ProcStatError::Malformed(pid))?;
    let start_time = fields
        .get(STARTTIME_FIELD)
        .and_then(|s| s.parse().ok())
        .ok_or(ProcStatError::Malformed(pid))?;

    Ok(ProcessStat {
        pid,
        state,
        ppid,
        start_time,
    })
}
