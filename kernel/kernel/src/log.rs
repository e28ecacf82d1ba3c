//! Two-phase logging: an early serial-only logger usable before the heap
//! exists, and a full logger with multiple sinks once it does.

use crate::config::MAX_LOG_LEVEL;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use vesper_core::log::LogLevel;
use vesper_core::sync::SpinLock;

/// A destination log records are written to.
pub trait LogSink: Send {
    /// Writes a single formatted line to the sink.
    fn write_str(&mut self, s: &str);
    /// The highest severity this sink is willing to emit.
    fn max_level(&self) -> LogLevel;
    /// A short name identifying the sink, for diagnostics about the logger itself.
    fn name(&self) -> &str;
}

static EARLY_SERIAL_ACTIVE: AtomicBool = AtomicBool::new(false);

struct EarlySerialSink;

impl fmt::Write for EarlySerialSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        crate::arch::serial::write_str(s);
        Ok(())
    }
}

/// Activates the pre-heap serial-only logger. Call once, as early in boot
/// as the serial port is initialized.
pub fn init_early_serial() {
    EARLY_SERIAL_ACTIVE.store(true, Ordering::Release);
}

/// The full post-heap logger: an ordered list of sinks, each record written
/// to every sink whose `max_level` admits it.
pub struct Logger {
    sinks: SpinLock<Vec<Box<dyn LogSink>>>,
}

impl Logger {
    const fn new() -> Self {
        Self { sinks: SpinLock::new(Vec::new()) }
    }

    /// Registers a new sink. Existing sinks are unaffected.
    pub fn add_sink(&self, sink: Box<dyn LogSink>) {
        self.sinks.lock().push(sink);
    }

    fn dispatch(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if level < MAX_LOG_LEVEL {
            return;
        }
        if EARLY_SERIAL_ACTIVE.load(Ordering::Acquire) {
            use fmt::Write;
            let _ = write!(EarlySerialSink, "[{level}] {args}\n");
        }
        let mut sinks = self.sinks.lock();
        if sinks.is_empty() {
            return;
        }
        for sink in sinks.iter_mut() {
            if level >= sink.max_level() {
                sink.write_str(&alloc::format!("[{level}] {args}\n"));
            }
        }
    }
}

/// The global logger instance.
pub static LOGGER: Logger = Logger::new();

#[doc(hidden)]
pub fn __log(level: LogLevel, args: fmt::Arguments<'_>) {
    LOGGER.dispatch(level, args);
}

/// Writes a panic report directly to the early serial sink, bypassing the
/// full logger (which may itself be in an inconsistent state by the time a
/// panic handler runs).
pub fn panic_serial(info: &core::panic::PanicInfo) {
    use fmt::Write;
    let _ = write!(EarlySerialSink, "\nKERNEL PANIC: {info}\n");
}

/// Logs a trace-level record.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        $crate::log::__log(::vesper_core::log::LogLevel::Trace, format_args!($($arg)*))
    };
}

/// Logs a debug-level record.
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        $crate::log::__log(::vesper_core::log::LogLevel::Debug, format_args!($($arg)*))
    };
}

/// Logs an info-level record.
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {
        $crate::log::__log(::vesper_core::log::LogLevel::Info, format_args!($($arg)*))
    };
}

/// Logs a warning-level record.
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::log::__log(::vesper_core::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

/// Logs an error-level record.
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {
        $crate::log::__log(::vesper_core::log::LogLevel::Error, format_args!($($arg)*))
    };
}
