//! Logging to stderr through flexi_logger.

use std::io::Write;

use anyhow::{Context, Result};
use flexi_logger::{DeferredNow, Logger, LoggerHandle};
use log::Record;

/// `[time] [pid/thread] [LEVEL] message`
fn format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    let thread = std::thread::current();
    write!(
        w,
        "[{}] [{}/{}] [{}] {}",
        now.format("%Y-%m-%d %H:%M:%S %z"),
        std::process::id(),
        thread.name().unwrap_or("<unnamed>"),
        record.level(),
        record.args()
    )
}

/// Map the configured level name to a log spec.
fn log_spec(level: &str) -> Result<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warning" | "warn" => Ok("warn"),
        "error" | "critical" => Ok("error"),
        other => anyhow::bail!("Unsupported log level: {other:?}"),
    }
}

/// Start logging. `RUST_LOG` takes precedence over the configured level,
/// `--debug` over both.
pub fn init(level: &str, debug: bool) -> Result<LoggerHandle> {
    let logger = if debug {
        Logger::try_with_str("debug")
    } else {
        Logger::try_with_env_or_str(log_spec(level)?)
    };

    logger
        .context("Invalid log specification")?
        .format(format)
        .log_to_stderr()
        .start()
        .context("Failed to start logger")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_spec() {
        assert_eq!(log_spec("warning").unwrap(), "warn");
        assert_eq!(log_spec("CRITICAL").unwrap(), "error");
        assert_eq!(log_spec("debug").unwrap(), "debug");
        assert!(log_spec("verbose").is_err());
    }
}
