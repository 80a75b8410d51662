//! Structured logging for xtmask
//!
//! Text mode goes through `env_logger`; a `json:` level prefix switches to
//! one JSON object per line, written to `XTMASK_LOG_PATH` or stderr.

use chrono::{Local, Utc};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde_json::json;
use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;

/// Level used when neither the CLI nor the environment selects one
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// JSON logger implementation
#[derive(Debug)]
pub struct JsonLogger {
    level: Level,
    target_file: Mutex<Option<std::fs::File>>,
}

/// Split a level string into (json mode, bare level)
fn split_level(level_str: &str) -> (bool, &str) {
    if let Some(stripped) = level_str.strip_prefix("json:") {
        (true, stripped)
    } else if level_str == "json" {
        (true, "info")
    } else {
        (false, level_str)
    }
}

fn level_filter(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

impl JsonLogger {
    /// Create a new JSON logger
    pub fn new(level: Level, log_path: Option<String>) -> Self {
        let target_file = if let Some(path) = log_path {
            OpenOptions::new().create(true).append(true).open(path).ok()
        } else {
            None
        };

        JsonLogger {
            level,
            target_file: Mutex::new(target_file),
        }
    }

    /// Initialize the logger with specified level and source
    pub fn init_with_level(level_str: &str, source: &str) -> (String, String) {
        let log_path = env::var("XTMASK_LOG_PATH").ok();
        let (use_json, actual_level) = split_level(level_str);
        let filter = level_filter(actual_level);

        if !use_json {
            let result = env_logger::Builder::new()
                .filter_level(filter)
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "[{} {} {}] {}",
                        Local::now().format("%Y-%m-%dT%H:%M:%S%z"),
                        record.level(),
                        record.target(),
                        record.args()
                    )
                })
                .try_init();
            if let Err(e) = result {
                eprintln!("Failed to initialize logger: {e}");
            }
            return (actual_level.to_string(), source.to_string());
        }

        // JSON mode without a usable level still logs warnings and errors
        let level = filter.to_level().unwrap_or(Level::Warn);
        let logger = Box::new(JsonLogger::new(level, log_path));

        if let Err(e) = log::set_boxed_logger(logger) {
            eprintln!("Failed to initialize JSON logger: {e}");
            return (actual_level.to_string(), source.to_string());
        }

        log::set_max_level(filter);
        (actual_level.to_string(), source.to_string())
    }

    /// Initialize from `XTMASK_LOG_LEVEL`, falling back to warnings only
    pub fn init() {
        let log_level =
            env::var("XTMASK_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
        Self::init_with_level(&log_level, "XTMASK_LOG_LEVEL");
    }
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let log_entry = json!({
            "@timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            "@level": record.level().to_string().to_lowercase(),
            "@message": record.args().to_string(),
            "@module": record.target(),
            "@pid": std::process::id(),
            "@file": record.file().unwrap_or("unknown"),
            "@line": record.line().unwrap_or(0),
        });

        let json_string = format!(
            "{}\n",
            serde_json::to_string(&log_entry).unwrap_or_default()
        );

        if let Ok(mut file_guard) = self.target_file.lock() {
            if let Some(ref mut file) = *file_guard {
                let _ = file.write_all(json_string.as_bytes());
                let _ = file.flush();
                return;
            }
        }

        let _ = io::stderr().write_all(json_string.as_bytes());
        let _ = io::stderr().flush();
    }

    fn flush(&self) {
        if let Ok(mut file_guard) = self.target_file.lock() {
            if let Some(ref mut file) = *file_guard {
                let _ = file.flush();
            }
        }
        let _ = io::stderr().flush();
    }
}

/// Helper to check if JSON logging is enabled
pub fn is_json_logging() -> bool {
    env::var("XTMASK_LOG_LEVEL")
        .map(|v| v.starts_with("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_level() {
        assert_eq!(split_level("json:debug"), (true, "debug"));
        assert_eq!(split_level("json"), (true, "info"));
        assert_eq!(split_level("trace"), (false, "trace"));
    }

    #[test]
    fn test_unknown_level_falls_back_to_warn() {
        assert_eq!(level_filter("loud"), LevelFilter::Warn);
        assert_eq!(level_filter("off"), LevelFilter::Off);
    }

    #[test]
    fn test_json_logger_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("xtmask.log");
        let logger = JsonLogger::new(Level::Debug, Some(path.display().to_string()));

        logger.log(
            &Record::builder()
                .args(format_args!("encoded pair"))
                .level(Level::Info)
                .target("xtmask::codec")
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("too chatty"))
                .level(Level::Trace)
                .target("xtmask::codec")
                .build(),
        );
        logger.flush();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 1);
        let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry["@level"], "info");
        assert_eq!(entry["@message"], "encoded pair");
        assert_eq!(entry["@module"], "xtmask::codec");
    }
}
