use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILE: &str = "price_tracker.log";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_file: PathBuf,
    pub log_level: String,
}

impl LoggingConfig {
    pub fn new(log_file: impl Into<PathBuf>) -> Self {
        Self {
            log_file: log_file.into(),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Console output plus an append-only file sink in
/// `timestamp LEVEL target: message` form.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;

    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.log_level))
        .with(fmt::layer().with_writer(std::io::stderr).with_timer(timer.clone()))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(Mutex::new(file)),
        )
        .init();

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLevel {
    Error,
    Warning,
    Info,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LineLevel,
    pub text: String,
}

impl LogLine {
    fn classify(line: &str) -> Self {
        let level = if line.contains("ERROR") {
            LineLevel::Error
        } else if line.contains("WARN") {
            LineLevel::Warning
        } else if line.contains("INFO") {
            LineLevel::Info
        } else {
            LineLevel::Other
        };
        Self {
            level,
            text: line.trim().to_string(),
        }
    }
}

/// Last `limit` lines of the log file, newest first. No file, no lines.
pub fn recent_lines(path: &Path, limit: usize) -> std::io::Result<Vec<LogLine>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .rev()
        .take(limit)
        .map(LogLine::classify)
        .collect())
}
