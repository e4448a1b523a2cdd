//! Process-wide log sink setup.
//!
//! # Responsibility
//! - Route the crate's `log` events to size-rotated files once per process.
//!
//! # Invariants
//! - Initialization with the same configuration is idempotent.
//! - A second initialization with a different level or directory is
//!   rejected instead of silently reconfiguring the sink.
//! - Log lines are `key=value` metadata; emails and password hashes are
//!   never logged.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "userstore";
const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 5;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();

struct ActiveLogger {
    config: LogConfig,
    _handle: LoggerHandle,
}

/// File logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// One of `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory receiving `userstore*.log` files.
    pub log_dir: PathBuf,
    pub max_file_bytes: u64,
    pub max_files: usize,
}

impl LogConfig {
    pub fn new(level: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            level: level.into(),
            log_dir: log_dir.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    UnsupportedLevel(String),
    RelativeLogDir(PathBuf),
    CreateDir { dir: PathBuf, message: String },
    Backend(String),
    AlreadyInitialized { active: PathBuf, active_level: String },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::RelativeLogDir(dir) => {
                write!(f, "log_dir must be an absolute path, got `{}`", dir.display())
            }
            Self::CreateDir { dir, message } => write!(
                f,
                "failed to create log directory `{}`: {message}",
                dir.display()
            ),
            Self::Backend(message) => write!(f, "failed to start logger: {message}"),
            Self::AlreadyInitialized {
                active,
                active_level,
            } => write!(
                f,
                "logging already initialized at `{}` with level `{active_level}`; refusing to switch",
                active.display()
            ),
        }
    }
}

impl Error for LoggingError {}

/// Starts file logging, or confirms it is already running with `config`.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let normalized = LogConfig {
        level: normalize_level(&config.level)?.to_string(),
        log_dir: require_absolute(&config.log_dir)?,
        ..config.clone()
    };

    let active = ACTIVE_LOGGER.get_or_try_init(|| start_logger(normalized.clone()))?;
    if active.config != normalized {
        return Err(LoggingError::AlreadyInitialized {
            active: active.config.log_dir.clone(),
            active_level: active.config.level.clone(),
        });
    }
    Ok(())
}

/// Returns the configuration of the running logger, if any.
pub fn logging_status() -> Option<LogConfig> {
    ACTIVE_LOGGER.get().map(|active| active.config.clone())
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(config: LogConfig) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&config.log_dir).map_err(|err| LoggingError::CreateDir {
        dir: config.log_dir.clone(),
        message: err.to_string(),
    })?;

    let handle = Logger::try_with_str(config.level.as_str())
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(config.log_dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(config.max_file_bytes),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config.max_files),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    info!(
        "event=logging_init module=core status=ok level={} version={}",
        config.level,
        crate::core_version()
    );
    Ok(ActiveLogger {
        config,
        _handle: handle,
    })
}

fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}

fn require_absolute(dir: &Path) -> Result<PathBuf, LoggingError> {
    if dir.as_os_str().is_empty() || !dir.is_absolute() {
        return Err(LoggingError::RelativeLogDir(dir.to_path_buf()));
    }
    Ok(dir.to_path_buf())
}
