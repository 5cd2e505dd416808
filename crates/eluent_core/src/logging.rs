//! Logging bootstrap and safety policy.
//!
//! # Responsibility
//! - Start rotating file logs once per daemon process.
//!
//! # Invariants
//! - A second `init_logging` call with the same settings is a no-op; a
//!   conflicting one is rejected without touching the active logger.
//! - Initialization never panics, and captured panics are logged as a
//!   single sanitized line.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, LevelFilter};
use once_cell::sync::Lazy;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

const LOG_FILE_BASENAME: &str = "eluent";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const ROTATED_FILES_KEPT: usize = 4;
const PANIC_DETAIL_CHARS: usize = 120;

static ACTIVE: Lazy<Mutex<Option<ActiveLogger>>> = Lazy::new(|| Mutex::new(None));

struct ActiveLogger {
    level: LevelFilter,
    directory: PathBuf,
    _handle: LoggerHandle,
}

/// Logging bootstrap error.
#[derive(Debug)]
pub enum LoggingError {
    UnknownLevel(String),
    RelativeDirectory(PathBuf),
    AlreadyActive {
        directory: PathBuf,
        level: LevelFilter,
    },
    Io {
        directory: PathBuf,
        source: std::io::Error,
    },
    Backend(String),
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLevel(level) => write!(f, "unknown log level `{level}`"),
            Self::RelativeDirectory(directory) => write!(
                f,
                "log directory must be absolute, got `{}`",
                directory.display()
            ),
            Self::AlreadyActive { directory, level } => write!(
                f,
                "logging already active at `{}` (level {level}); refusing to reconfigure",
                directory.display()
            ),
            Self::Io { directory, source } => write!(
                f,
                "cannot prepare log directory `{}`: {source}",
                directory.display()
            ),
            Self::Backend(detail) => write!(f, "logger backend failed: {detail}"),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Active logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingStatus {
    pub level: LevelFilter,
    pub directory: PathBuf,
}

/// Starts rotating file logs under `log_dir` at `level`.
///
/// # Errors
/// - [`LoggingError::UnknownLevel`] / [`LoggingError::RelativeDirectory`]
///   for bad inputs.
/// - [`LoggingError::AlreadyActive`] when logging is running with a
///   different directory or level.
pub fn init_logging(level: &str, log_dir: &Path) -> Result<(), LoggingError> {
    let level: LevelFilter = level
        .trim()
        .parse()
        .map_err(|_| LoggingError::UnknownLevel(level.trim().to_string()))?;
    if !log_dir.is_absolute() {
        return Err(LoggingError::RelativeDirectory(log_dir.to_path_buf()));
    }

    let mut active = ACTIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = active.as_ref() {
        if existing.directory == log_dir && existing.level == level {
            return Ok(());
        }
        return Err(LoggingError::AlreadyActive {
            directory: existing.directory.clone(),
            level: existing.level,
        });
    }

    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::Io {
        directory: log_dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level.to_string())
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(ROTATED_FILES_KEPT),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    hook_panics_once();
    info!(
        "event=logging_init module=core status=ok level={level} dir={} version={}",
        log_dir.display(),
        env!("CARGO_PKG_VERSION")
    );

    *active = Some(ActiveLogger {
        level,
        directory: log_dir.to_path_buf(),
        _handle: handle,
    });
    Ok(())
}

/// Returns the active configuration, or `None` before `init_logging`.
pub fn logging_status() -> Option<LoggingStatus> {
    let active = ACTIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    active.as_ref().map(|logger| LoggingStatus {
        level: logger.level,
        directory: logger.directory.clone(),
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

fn hook_panics_once() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let at = info
                .location()
                .map(|location| format!("{}:{}", location.file(), location.line()))
                .unwrap_or_else(|| "?".to_string());
            error!(
                "event=panic module=core status=error at={at} detail={}",
                brief_payload(info)
            );
            previous(info);
        }));
    });
}

fn brief_payload(info: &std::panic::PanicHookInfo<'_>) -> String {
    let text = info
        .payload()
        .downcast_ref::<&str>()
        .map(|payload| (*payload).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<opaque panic payload>".to_string());
    single_line(&text, PANIC_DETAIL_CHARS)
}

/// Panic payloads can carry arbitrary user text; fold control characters
/// away and cap the length so one panic is one log line.
fn single_line(text: &str, cap: usize) -> String {
    let mut out: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(cap)
        .collect();
    if text.chars().count() > cap {
        out.push('…');
    }
    out
}
