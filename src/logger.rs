//! Logging infrastructure
//!
//! This module provides logging via the `log` crate. Output goes to a console
//! sink registered by the firmware (serial port, memory console, ...), one
//! `[timestamp] [LEVEL] message` line per record.
//!
//! Timestamps come from an optional source, typically a free-running tick
//! counter; without one they are printed as 0.

use core::fmt;

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Console output routine
pub type Sink = fn(fmt::Arguments);

/// Tick source for log timestamps
pub type TimestampSource = fn() -> u64;

struct Outputs {
    sink: Option<Sink>,
    timestamp: Option<TimestampSource>,
}

static OUTPUTS: Mutex<Outputs> = Mutex::new(Outputs {
    sink: None,
    timestamp: None,
});

/// Level tag with ANSI colors
fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31mERROR\x1b[0m",
        Level::Warn => "\x1b[33mWARN\x1b[0m ",
        Level::Info => "\x1b[32mINFO\x1b[0m ",
        Level::Debug => "\x1b[34mDEBUG\x1b[0m",
        Level::Trace => "\x1b[35mTRACE\x1b[0m",
    }
}

/// Console logger
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Copy out so a sink that logs cannot deadlock on OUTPUTS
        let (sink, timestamp) = {
            let outputs = OUTPUTS.lock();
            (outputs.sink, outputs.timestamp)
        };
        let Some(sink) = sink else {
            return;
        };
        let ts = timestamp.map_or(0, |f| f());

        sink(format_args!(
            "[{:>10}] [{}] {}\n",
            ts,
            level_str(record.level()),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Initialize the logging subsystem with `sink` as console output
///
/// Fails if a logger was already installed.
pub fn init(sink: Sink) -> Result<(), SetLoggerError> {
    OUTPUTS.lock().sink = Some(sink);
    log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Debug))
}

/// Set the timestamp source for subsequent records
pub fn set_timestamp_source(source: TimestampSource) {
    OUTPUTS.lock().timestamp = Some(source);
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
