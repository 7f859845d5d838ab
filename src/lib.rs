//! Reapd is a small daemon that reaps orphaned child processes on behalf of
//! programs that cannot or do not wait on their own children. Clients report
//! parent→child relationships over a unix socket as processes fork; when a
//! registered parent is observed dead, the daemon signals its still-registered
//! children, fencing against PID reuse with per-process start times.

/// CLI interface.
pub mod cli;

/// Client-side protocol emitter.
pub mod client;

/// Daemon configuration.
pub mod config;

/// The server context and run loop.
pub mod daemon;

/// Error handling.
pub mod error;

/// Socket multiplexing.
pub mod io;

/// Process metadata queries.
pub mod procstat;

/// Wire protocol framing and buffers.
pub mod protocol;

/// Parent/child registry and the orphan sweep.
pub mod registry;

/// Hash table engine backing the registries.
pub mod table;
