use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;

/// Log verbosity, from silent to everything
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Nothing = 0,
    User = 1,
    Error = 2,
    Warning = 3,
    #[default]
    Info = 4,
    Debug = 5,
    All = 6,
}

impl LogLevel {
    /// Create a LogLevel from an integer
    pub fn from_i32(level: i32) -> Self {
        match level {
            0 => LogLevel::Nothing,
            1 => LogLevel::User,
            2 => LogLevel::Error,
            3 => LogLevel::Warning,
            4 => LogLevel::Info,
            5 => LogLevel::Debug,
            6 => LogLevel::All,
            _ => LogLevel::Info,
        }
    }

    /// Get the integer representation
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Parse a level given either by name or by number
    pub fn parse(s: &str) -> Result<Self> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "nothing" | "off" => LogLevel::Nothing,
            "user" => LogLevel::User,
            "error" => LogLevel::Error,
            "warning" | "warn" => LogLevel::Warning,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "all" | "trace" => LogLevel::All,
            other => {
                let n: i32 = other
                    .parse()
                    .with_context(|| format!("Unknown log level '{}'", s))?;
                if !(0..=6).contains(&n) {
                    anyhow::bail!("Log level {} out of range (0 to 6)", n);
                }
                LogLevel::from_i32(n)
            }
        };
        Ok(level)
    }

    /// The `log` filter showing this level and everything more severe.
    ///
    /// User-facing messages are logged at error severity.
    pub fn level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Nothing => LevelFilter::Off,
            LogLevel::User | LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::All => LevelFilter::Trace,
        }
    }
}

/// Install the `env_logger` backend
///
/// `RUST_LOG` still refines the filter. With `log_file` set, output goes to
/// that file instead of stderr. Returns `false` if a logger was already
/// installed, which leaves the existing one in place.
pub fn init_logging(level: LogLevel, log_file: Option<&Path>) -> Result<bool> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level.level_filter())
        .parse_default_env()
        .format_timestamp_micros();

    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("Can't open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    Ok(builder.try_init().is_ok())
}
