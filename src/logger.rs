use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;

pub const LEVEL_DEBUG: i64 = 10;
pub const LEVEL_INFO: i64 = 20;
pub const LEVEL_WARN: i64 = 30;
pub const LEVEL_ERROR: i64 = 40;

/// Line-oriented log writer shared across the pipeline components.
///
/// Messages below the configured level are discarded. Every line carries a
/// local timestamp and a level label, and the sink is flushed per line so a
/// crashed run still leaves a usable log behind.
pub struct Logger {
    sink: Mutex<Option<BufWriter<Box<dyn Write + Send>>>>,
    level: i64,
}

impl Logger {
    /// Append to the given log file.
    pub fn open(path: &Path, level: i64) -> io::Result<Logger> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Logger {
            sink: Mutex::new(Some(BufWriter::new(Box::new(file)))),
            level,
        })
    }

    pub fn stderr(level: i64) -> Logger {
        Logger {
            sink: Mutex::new(Some(BufWriter::new(Box::new(io::stderr())))),
            level,
        }
    }

    /// A logger that swallows everything, for tests.
    pub fn null() -> Logger {
        Logger {
            sink: Mutex::new(None),
            level: i64::MAX,
        }
    }

    pub fn enabled(&self, level: i64) -> bool {
        level >= self.level
    }

    pub fn debug(&self, message: &str) {
        self.log(LEVEL_DEBUG, "DEBUG", message);
    }

    pub fn info(&self, message: &str) {
        self.log(LEVEL_INFO, "INFO", message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LEVEL_WARN, "WARN", message);
    }

    pub fn error(&self, message: &str) {
        self.log(LEVEL_ERROR, "ERROR", message);
    }

    fn log(&self, level: i64, label: &str, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let Ok(mut guard) = self.sink.lock() else {
            return;
        };
        if let Some(writer) = guard.as_mut() {
            let now = Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(writer, "[{}] {} {}", now, label, message);
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_threshold() {
        let logger = Logger::stderr(LEVEL_WARN);
        assert!(!logger.enabled(LEVEL_DEBUG));
        assert!(!logger.enabled(LEVEL_INFO));
        assert!(logger.enabled(LEVEL_WARN));
        assert!(logger.enabled(LEVEL_ERROR));
    }

    #[test]
    fn test_null_logger_discards() {
        let logger = Logger::null();
        assert!(!logger.enabled(LEVEL_ERROR));
        logger.error("goes nowhere");
    }
}
