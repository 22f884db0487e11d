//! Logging for the native host binary.
//!
//! Two sinks: colored lines on stderr and plain lines in `native-host.log`. Stdout carries
//! driver replies only, so nothing here writes to it.

use crate::error::NativeHostError;

use std::fmt::Arguments;
use std::io::stderr;
use std::path::Path;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use fern::{Dispatch, FormatCallback};
use humantime::format_rfc3339;
use log::{LevelFilter, Record, info, warn};

static INIT_LOGGER_ONCE: Once = Once::new();
static LOGGER_ALREADY_CALLED: AtomicBool = AtomicBool::new(false);

const LOG_FILE_NAME: &str = "native-host.log";

/// Environment variable overriding the build's default level (`trace`..`error`, `off`).
pub const LOG_LEVEL_ENV: &str = "NATIVE_HOST_LOG";

/// The process transport traces every request and reply line; capped at debug.
const PROCESS_TRANSPORT_TARGET: &str = "host_core::transport::process";

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Level from [`LOG_LEVEL_ENV`] if set and valid, otherwise the build default.
pub fn resolve_level(env_value: Option<&str>) -> LevelFilter {
    env_value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_LOG_LEVEL)
}

/// Initialize logging into `log_dir`.
///
/// Safe to call more than once: later calls log a warning and return Ok.
///
/// # Errors
///
/// Returns [`NativeHostError::NativeHost`] if the log file cannot be created or another
/// logger is already installed.
pub fn initialize(log_dir: &Path) -> Result<(), NativeHostError> {
    if LOGGER_ALREADY_CALLED.swap(true, Ordering::SeqCst) {
        warn!("Logger already initialized");
        return Ok(());
    }

    let level = resolve_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref());
    let mut result = Ok(());

    INIT_LOGGER_ONCE.call_once(|| {
        result = initialize_internal(log_dir, level);
        if result.is_ok() {
            info!("Logger initialized with level: {level:?}");
        }
    });

    result
}

#[track_caller]
fn initialize_internal(log_dir: &Path, level: LevelFilter) -> Result<(), NativeHostError> {
    let log_file_path = log_dir.join(LOG_FILE_NAME);
    let log_file = fern::log_file(&log_file_path).map_err(|e| {
        NativeHostError::native_host(format!(
            "Failed to create log file {}: {e}",
            log_file_path.display()
        ))
    })?;

    let colors = ColoredLevelConfig::new()
        .debug(Blue)
        .info(Green)
        .warn(Yellow)
        .error(Red)
        .trace(Magenta);

    let console = Dispatch::new()
        .format(move |out, message, record| {
            write_line(out, colors.color(record.level()), message, record)
        })
        .chain(stderr());

    let file = Dispatch::new()
        .format(|out, message, record| write_line(out, record.level(), message, record))
        .chain(log_file);

    Dispatch::new()
        .level(level)
        .level_for(PROCESS_TRANSPORT_TARGET, level.min(LevelFilter::Debug))
        .chain(console)
        .chain(file)
        .apply()
        .map_err(|e| NativeHostError::native_host(format!("Failed to initialize logger: {e}")))
}

fn write_line(
    out: FormatCallback<'_>,
    level: impl std::fmt::Display,
    message: &Arguments<'_>,
    record: &Record<'_>,
) {
    out.finish(format_args!(
        "[{date} - {level}] {message} [{file}:{line}]",
        date = format_rfc3339(SystemTime::now()),
        file = record.file().unwrap_or("unknown"),
        line = record.line().unwrap_or(0),
    ))
}
