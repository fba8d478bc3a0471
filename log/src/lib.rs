//! Logging setup for Quill with file output and optional stdout.
//!
//! Logs always go to a file at `warn` level (or higher if requested via the
//! environment). Stdout logging is enabled when `QUILL_LOG` or `RUST_LOG` is
//! set, or in debug builds.
//!
//! ## Environment Variables
//!
//! 1. **`QUILL_LOG`** (highest priority) - Quill-specific logging control
//! 2. **`RUST_LOG`** - Standard tracing environment variable
//! 3. **Default** - `warn` globally, `info` for quill crates
//!
//! ## Log File Location
//!
//! Default: `<data_local_dir>/quill/logs/quill-<pid>.log`
//! - macOS: `~/Library/Application Support/quill/logs/quill-12345.log`
//! - Linux: `~/.local/share/quill/logs/quill-12345.log`
//!
//! Override with `QUILL_LOG_FILE` or by passing a path in [`LogConfig`].

use std::{env, path::PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Returned from [`init`]; must be held alive to ensure log file flushing.
pub struct LogGuard {
    _file_guard: WorkerGuard,
    pub log_file: PathBuf,
}

#[derive(Default)]
pub struct LogConfig {
    pub log_file_path: Option<PathBuf>,
}

/// Initialize logging.
///
/// This function respects the environment variable priority described in the module docs:
/// `QUILL_LOG` > `RUST_LOG` > default settings.
///
/// The returned [`LogGuard`] must be held for the lifetime of the program --
/// dropping it flushes and stops the background file writer.
pub fn init(config: LogConfig) -> Result<LogGuard, Box<dyn std::error::Error + Send + Sync>> {
    let (log_dir, filename) = resolve_log_path(config.log_file_path);

    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::never(&log_dir, &filename);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = create_file_filter()?;
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_filter(file_filter);

    let stdout_enabled =
        env::var("QUILL_LOG").is_ok() || env::var("RUST_LOG").is_ok() || cfg!(debug_assertions);

    let stdout_layer = if stdout_enabled {
        Some(fmt::layer().with_filter(create_filter()?))
    } else {
        None
    };

    Registry::default()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(LogGuard {
        _file_guard: file_guard,
        log_file: log_dir.join(filename),
    })
}

/// Initialize logging for tests.
///
/// Identical to [`init`] but stdout-only (no file output), with a name that makes it
/// clear this is safe for test usage. Will not crash if called multiple times or if
/// logging is already initialized by another test.
pub fn test() {
    let _ = test_init();
}

fn test_init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = create_filter()?;
    fmt::fmt().with_env_filter(filter).try_init()?;
    Ok(())
}

fn resolve_log_path(override_path: Option<PathBuf>) -> (PathBuf, String) {
    let filename = format!("quill-{}.log", std::process::id());

    let override_path = override_path.or_else(|| env::var("QUILL_LOG_FILE").ok().map(Into::into));

    if let Some(path) = override_path {
        if path.extension().is_some() {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(filename);
            return (dir.to_path_buf(), name);
        }
        return (path, filename);
    }

    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quill")
        .join("logs");

    (dir, filename)
}

/// File filter: uses user-specified level if set, otherwise defaults to `warn`.
fn create_file_filter() -> Result<EnvFilter, Box<dyn std::error::Error + Send + Sync>> {
    if env::var("QUILL_LOG").is_ok() || env::var("RUST_LOG").is_ok() {
        return create_filter();
    }
    Ok(EnvFilter::new("warn"))
}

/// Create the appropriate [`EnvFilter`] based on environment variables.
///
/// Implements the priority system: `QUILL_LOG` > `RUST_LOG` > defaults.
fn create_filter() -> Result<EnvFilter, Box<dyn std::error::Error + Send + Sync>> {
    if let Ok(quill_log) = env::var("QUILL_LOG") {
        return Ok(expand_quill_log(&quill_log));
    }

    if let Ok(rust_log) = env::var("RUST_LOG") {
        return Ok(EnvFilter::new(rust_log));
    }

    // Default: warn globally, info for quill crates
    Ok(EnvFilter::new("warn,quill_text=info,quill_log=info"))
}

/// Expand `QUILL_LOG` values into full tracing filter strings.
///
/// - `QUILL_LOG=debug` becomes `warn,quill_text=debug,...`
/// - `QUILL_LOG=quill_text=trace` is used as-is (advanced syntax)
fn expand_quill_log(quill_log: &str) -> EnvFilter {
    if quill_log.contains('=') || quill_log.contains(':') || quill_log.contains(',') {
        return EnvFilter::new(quill_log);
    }

    EnvFilter::new(format!(
        "warn,quill_text={quill_log},quill_log={quill_log}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_path_with_extension_splits_dir_and_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("custom.log");
        let (log_dir, name) = resolve_log_path(Some(path));
        assert_eq!(log_dir, dir.path());
        assert_eq!(name, "custom.log");
    }

    #[test]
    fn override_path_without_extension_is_a_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (log_dir, name) = resolve_log_path(Some(dir.path().to_path_buf()));
        assert_eq!(log_dir, dir.path());
        assert!(name.starts_with("quill-") && name.ends_with(".log"));
    }

    #[test]
    fn plain_level_expands_to_quill_crates() {
        let rendered = expand_quill_log("debug").to_string();
        assert!(rendered.contains("quill_text=debug"));
        assert!(rendered.contains("quill_log=debug"));
    }
}
