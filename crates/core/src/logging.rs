use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

impl LogLevel {
    /// Lower-case name, usable as a `tracing_subscriber::EnvFilter` directive.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

pub type SharedLogSink = Arc<dyn LogSink>;

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn log(&self, record: LogRecord) {
        (**self).log(record);
    }
}

#[derive(Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _record: LogRecord) {}
}

#[derive(Default)]
pub struct VecLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl VecLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: LogRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(record);
        }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|guard| guard.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|record| record.message.contains(needle))
    }
}

impl LogSink for VecLogSink {
    fn log(&self, record: LogRecord) {
        self.push(record);
    }
}

/// Console output without timestamps. Warnings and errors keep their label.
#[derive(Default, Clone)]
pub struct StdoutLogSink;

impl StdoutLogSink {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for StdoutLogSink {
    fn log(&self, record: LogRecord) {
        match record.level {
            LogLevel::Warn | LogLevel::Error => println!("[{}] {}", record.level, record.message),
            _ => println!("{}", record.message),
        }
    }
}

/// Re-emits records as `tracing` events under the `ebook` target, so they
/// reach whatever subscriber the binary installed (the log file in `ebookctl`).
#[derive(Default, Clone)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, record: LogRecord) {
        let message = record.message;
        match record.level {
            LogLevel::Trace => tracing::trace!(target: "ebook", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "ebook", "{message}"),
            LogLevel::Info => tracing::info!(target: "ebook", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "ebook", "{message}"),
            LogLevel::Error => tracing::error!(target: "ebook", "{message}"),
        }
    }
}

/// Drops records below `threshold` before handing them on.
pub struct LevelFilterSink<S> {
    inner: S,
    threshold: LogLevel,
}

impl<S: LogSink> LevelFilterSink<S> {
    pub fn new(inner: S, threshold: LogLevel) -> Self {
        Self { inner, threshold }
    }
}

impl<S: LogSink> LogSink for LevelFilterSink<S> {
    fn log(&self, record: LogRecord) {
        if record.level >= self.threshold {
            self.inner.log(record);
        }
    }
}

/// Fans every record out to several sinks.
#[derive(Default)]
pub struct TeeLogSink {
    sinks: Vec<SharedLogSink>,
}

impl TeeLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedLogSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl LogSink for TeeLogSink {
    fn log(&self, record: LogRecord) {
        for sink in &self.sinks {
            sink.log(record.clone());
        }
    }
}
