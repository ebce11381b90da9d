//! Logging setup with tracing.
//!
//! Cache diagnostics are emitted under the `cached_resource` target. The filter
//! comes from `CACHED_RESOURCE_LOG` when set, otherwise from the configured
//! level.

use std::path::Path;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::{Error, Result};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "CACHED_RESOURCE_LOG";

/// Install the global subscriber. Logs go to stderr and, if `file` is given,
/// to a daily rolling file next to it.
pub fn init(level: &str, file: Option<&Path>) -> Result<()> {
  let level = parse_log_level(level)?;
  let filter = EnvFilter::try_from_env(LOG_ENV)
    .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

  let file_appender = file.map(|path| {
    tracing_appender::rolling::daily(
      path.parent().unwrap_or_else(|| Path::new(".")),
      path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("cached-resource.log")),
    )
  });

  let stderr = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(true);
  let registry = Registry::default().with(filter).with(stderr);

  let installed = match file_appender {
    Some(appender) => registry
      .with(
        fmt::layer()
          .with_writer(appender)
          .with_ansi(false)
          .with_target(true),
      )
      .try_init(),
    None => registry.try_init(),
  };
  installed.map_err(|e| Error::InvalidArgument(format!("Failed to initialize logging: {}", e)))?;

  tracing::debug!("Logging initialized with level: {}", level);
  Ok(())
}

/// Parse a level name.
pub fn parse_log_level(level: &str) -> Result<Level> {
  match level.to_lowercase().as_str() {
    "trace" => Ok(Level::TRACE),
    "debug" => Ok(Level::DEBUG),
    "info" => Ok(Level::INFO),
    "warn" | "warning" => Ok(Level::WARN),
    "error" => Ok(Level::ERROR),
    _ => Err(Error::InvalidArgument(format!(
      "Invalid log level: {}. Use trace, debug, info, warn, or error",
      level
    ))),
  }
}
