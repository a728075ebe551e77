//! Observability context: metrics registry plus optional file logging.
//!
//! # Responsibility
//! - Own the counters the repository updates on every operation.
//! - Start rotating file logs when the host asks for them.
//!
//! # Invariants
//! - A `Telemetry` value is created once at process start and shared by
//!   reference (`Arc`); the core keeps no metrics in globals.
//! - The file logger is process-wide: starting it again with the same
//!   directory and level is a no-op, any other combination is rejected.
//! - Log lines carry metadata only (ids, counts, kinds), never payloads.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const LOG_FILE_BASENAME: &str = "pvz";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static FILE_LOGGING: OnceCell<FileLogging> = OnceCell::new();

#[derive(Debug)]
pub enum TelemetryError {
    InvalidLevel(String),
    InvalidLogDir(String),
    CreateLogDir {
        log_dir: PathBuf,
        source: std::io::Error,
    },
    LoggerStart(String),
    /// The process logger already runs with another directory or level.
    AlreadyInitialized(String),
}

impl Display for TelemetryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::InvalidLogDir(message) => write!(f, "{message}"),
            Self::CreateLogDir { log_dir, source } => write!(
                f,
                "failed to create log directory `{}`: {source}",
                log_dir.display()
            ),
            Self::LoggerStart(message) => write!(f, "failed to start logger: {message}"),
            Self::AlreadyInitialized(message) => write!(f, "{message}"),
        }
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateLogDir { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Countable repository outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    PickupPointCreated,
    ReceptionCreated,
    ReceptionClosed,
    ItemAdded,
    ItemRemoved,
    Conflict,
    StorageError,
}

/// Lock-free counter registry.
#[derive(Debug, Default)]
pub struct Metrics {
    pickup_points_created: AtomicU64,
    receptions_created: AtomicU64,
    receptions_closed: AtomicU64,
    items_added: AtomicU64,
    items_removed: AtomicU64,
    conflicts: AtomicU64,
    storage_errors: AtomicU64,
}

/// Point-in-time copy of `Metrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub pickup_points_created: u64,
    pub receptions_created: u64,
    pub receptions_closed: u64,
    pub items_added: u64,
    pub items_removed: u64,
    pub conflicts: u64,
    pub storage_errors: u64,
}

impl Metrics {
    pub fn record(&self, event: MetricEvent) {
        let counter = match event {
            MetricEvent::PickupPointCreated => &self.pickup_points_created,
            MetricEvent::ReceptionCreated => &self.receptions_created,
            MetricEvent::ReceptionClosed => &self.receptions_closed,
            MetricEvent::ItemAdded => &self.items_added,
            MetricEvent::ItemRemoved => &self.items_removed,
            MetricEvent::Conflict => &self.conflicts,
            MetricEvent::StorageError => &self.storage_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pickup_points_created: self.pickup_points_created.load(Ordering::Relaxed),
            receptions_created: self.receptions_created.load(Ordering::Relaxed),
            receptions_closed: self.receptions_closed.load(Ordering::Relaxed),
            items_added: self.items_added.load(Ordering::Relaxed),
            items_removed: self.items_removed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

struct FileLogging {
    level: &'static str,
    log_dir: PathBuf,
    _handle: LoggerHandle,
}

/// Process-wide observability context, passed explicitly into the core.
#[derive(Default)]
pub struct Telemetry {
    metrics: Metrics,
    file_logging: Option<&'static FileLogging>,
}

impl Telemetry {
    /// Metrics only; log records go to whatever logger the host installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics plus rotating file logs under `log_dir`.
    ///
    /// The logger starts on the first call; later calls with the same
    /// directory and level share it.
    ///
    /// # Errors
    /// - `level` is not one of trace|debug|info|warn|error.
    /// - `log_dir` is empty, relative, or cannot be created.
    /// - File logging already runs with a different directory or level.
    /// - Another global logger is already installed in this process.
    pub fn with_file_logging(level: &str, log_dir: &str) -> Result<Self, TelemetryError> {
        let level = normalize_level(level)?;
        let log_dir = normalize_log_dir(log_dir)?;

        let state = FILE_LOGGING.get_or_try_init(|| start_file_logger(level, &log_dir))?;
        if state.log_dir != log_dir {
            return Err(TelemetryError::AlreadyInitialized(format!(
                "file logging already runs at `{}`; refusing to switch to `{}`",
                state.log_dir.display(),
                log_dir.display()
            )));
        }
        if state.level != level {
            return Err(TelemetryError::AlreadyInitialized(format!(
                "file logging already runs with level `{}`; refusing to switch to `{level}`",
                state.level
            )));
        }

        Ok(Self {
            metrics: Metrics::default(),
            file_logging: Some(state),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns `(level, log_dir)` when file logging is active.
    pub fn logging_status(&self) -> Option<(&'static str, &Path)> {
        self.file_logging
            .as_ref()
            .map(|state| (state.level, state.log_dir.as_path()))
    }
}

fn start_file_logger(level: &'static str, log_dir: &Path) -> Result<FileLogging, TelemetryError> {
    std::fs::create_dir_all(log_dir).map_err(|source| TelemetryError::CreateLogDir {
        log_dir: log_dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level)
        .map_err(|err| TelemetryError::LoggerStart(err.to_string()))?
        .log_to_file(FileSpec::default().directory(log_dir).basename(LOG_FILE_BASENAME))
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| TelemetryError::LoggerStart(err.to_string()))?;

    info!(
        "event=telemetry_init module=telemetry status=ok level={} log_dir={} version={}",
        level,
        log_dir.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(FileLogging {
        level,
        log_dir: log_dir.to_path_buf(),
        _handle: handle,
    })
}

/// Default log level for the current build mode.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn normalize_level(level: &str) -> Result<&'static str, TelemetryError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(TelemetryError::InvalidLevel(other.to_string())),
    }
}

fn normalize_log_dir(log_dir: &str) -> Result<PathBuf, TelemetryError> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err(TelemetryError::InvalidLogDir(
            "log_dir cannot be empty".to_string(),
        ));
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(TelemetryError::InvalidLogDir(format!(
            "log_dir must be an absolute path, got `{trimmed}`"
        )));
    }
    Ok(path.to_path_buf())
}
