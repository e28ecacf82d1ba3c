//! The shared log-level type. Kept here, rather than in `vesper-kernel`, so
//! that `no_std`, no-`alloc` crates can gate `#[cfg(test)]`-only tracing
//! without depending on the full logging stack.

use core::fmt;
use core::str::FromStr;

/// Severity of a log record, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fine-grained diagnostic detail, compiled out by default.
    Trace,
    /// Development-time diagnostics.
    Debug,
    /// Normal operational messages.
    Info,
    /// Recoverable but noteworthy conditions.
    Warn,
    /// Conditions that precede a fatal error or halt.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "trace" | "TRACE" => Ok(LogLevel::Trace),
            "debug" | "DEBUG" => Ok(LogLevel::Debug),
            "info" | "INFO" => Ok(LogLevel::Info),
            "warn" | "WARN" => Ok(LogLevel::Warn),
            "error" | "ERROR" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_severity_ascending() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("info".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("bogus".parse::<LogLevel>().is_err());
    }
}
