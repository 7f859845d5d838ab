//! Command-line interface for reapd.
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::config::{DEFAULT_SOCKET_PATH, DEFAULT_SWEEP_INTERVAL_SECS};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for reapd.
#[derive(Parser)]
#[command(name = "reapd", version, author)]
#[command(about = "A daemon that reaps orphaned child processes", long_about = None)]
pub struct Cli {
    /// Logging verbosity: off/error/warn/info/debug/trace or 0-5.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Path of the listening socket.
    #[arg(short = 'f', long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Seconds between orphan sweeps (must be >= 1).
    #[arg(short, long, default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub interval: u64,

    /// Signal number to send to orphan processes.
    #[arg(short = 'S', long, default_value_t = 2, allow_negative_numbers = true)]
    pub signal: i32,

    /// Lock file enforcing a single daemon instance.
    #[arg(short, long)]
    pub lockfile: Option<PathBuf>,

    /// Don't verify child start times before signaling.
    #[arg(long = "no-start-time-check")]
    pub no_start_time_check: bool,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
