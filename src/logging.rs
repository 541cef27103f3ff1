//! Filesystem logging facility
//!
//! Provides thread-safe logging for the filesystem core using the `log` crate.
//! Records are formatted as "[LEVEL] message" and handed to a sink installed
//! by the embedding environment (a serial port, a terminal, a test buffer).
//! Log levels are configured based on build configuration (debug/release).

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Receives every formatted log line
pub type Sink = fn(Level, fmt::Arguments<'_>);

/// Global logger instance available throughout the crate
pub static LOGGER: Logger = Logger::new();

/// Thread-safe logger forwarding to a replaceable sink
pub struct Logger {
    sink: Mutex<Option<Sink>>,
    /// Records above this level are dropped even if the facade lets them through
    level: Mutex<LevelFilter>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Creates a logger with no sink attached; records are dropped until one is set
    pub const fn new() -> Logger {
        Logger {
            sink: Mutex::new(None),
            level: Mutex::new(LevelFilter::Trace),
        }
    }

    /// Replaces the sink records are forwarded to
    pub fn set_sink(&self, sink: Sink) {
        *self.sink.lock() = Some(sink);
    }

    pub fn set_level(&self, level: LevelFilter) {
        *self.level.lock() = level;
    }
}

impl Log for Logger {
    /// Returns true if the message level is within this logger's maximum
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= *self.level.lock()
    }

    /// Formats the record as "[LEVEL] message" and hands it to the sink
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = self.sink.lock();
        if let Some(sink) = *sink {
            sink(
                record.level(),
                format_args!("[{}] {}", record.level(), record.args()),
            );
        }
    }

    fn flush(&self) {}
}

/// Installs the global logger with `sink` as its output
///
/// # Notes
/// * Sets different log levels for debug/release builds:
///   - Debug builds: LevelFilter::Debug
///   - Release builds: LevelFilter::Info
/// * Fails if another logger was already installed in this process; the sink
///   is still attached to [`LOGGER`] in that case.
pub fn init(sink: Sink) -> Result<(), SetLoggerError> {
    #[cfg(debug_assertions)]
    let level = LevelFilter::Debug;
    #[cfg(not(debug_assertions))]
    let level = LevelFilter::Info;

    LOGGER.set_sink(sink);
    LOGGER.set_level(level);
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

/// Sink writing each record as one line on standard error
#[cfg(any(test, feature = "std"))]
pub fn stderr_sink(_level: Level, args: fmt::Arguments<'_>) {
    std::eprintln!("{}", args);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use core::fmt::Write;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(_level: Level, args: fmt::Arguments<'_>) {
        let _ = writeln!(CAPTURED.lock(), "{}", args);
    }

    #[test]
    fn test_logger_formats_level_prefix() {
        let logger = Logger::new();
        logger.set_sink(capture);

        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("table copy {} differs", 1))
                .build(),
        );

        assert!(CAPTURED.lock().contains("[WARN] table copy 1 differs"));
    }

    #[test]
    fn test_logger_without_sink_drops_records() {
        let logger = Logger::new();
        logger.log(
            &Record::builder()
                .level(Level::Error)
                .args(format_args!("dropped"))
                .build(),
        );
        assert!(!CAPTURED.lock().contains("dropped"));
    }

    #[test]
    fn test_logger_level_filters_records() {
        let logger = Logger::new();
        logger.set_sink(capture);
        logger.set_level(LevelFilter::Info);

        for (level, text) in [(Level::Debug, "hidden detail"), (Level::Info, "volume mounted")] {
            logger.log(
                &Record::builder()
                    .level(level)
                    .args(format_args!("{}", text))
                    .build(),
            );
        }

        let captured = CAPTURED.lock();
        assert!(captured.contains("[INFO] volume mounted"));
        assert!(!captured.contains("hidden detail"));
    }

    #[test]
    fn test_stderr_sink_accepts_records() {
        let logger = Logger::new();
        logger.set_sink(stderr_sink);
        logger.log(
            &Record::builder()
                .level(Level::Info)
                .args(format_args!("written to stderr"))
                .build(),
        );
    }
}
