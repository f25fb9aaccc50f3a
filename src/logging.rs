//! Structured logging setup (tracing + tracing-subscriber)

use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn,reqwest=warn";

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Json,
  Pretty,
  Compact,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
  /// Filter directives (RUST_LOG syntax)
  pub filter: String,
  pub format: LogFormat,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: DEFAULT_FILTER.into(),
      format: LogFormat::Pretty,
    }
  }
}

impl LoggingConfig {
  pub fn from_env() -> Self {
    let format = match env::var("LOG_FORMAT").as_deref() {
      Ok("json") => LogFormat::Json,
      Ok("compact") => LogFormat::Compact,
      _ => LogFormat::Pretty,
    };

    Self {
      filter: env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
      format,
    }
  }

  /// Install the global subscriber. A second call is a no-op.
  pub fn init(&self) {
    let filter = EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match self.format {
      LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
      LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
      LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    };

    if result.is_err() {
      tracing::debug!("Tracing subscriber already installed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn test_format_from_env() {
    temp_env::with_vars([("LOG_FORMAT", Some("json")), ("RUST_LOG", Some("debug"))], || {
      let config = LoggingConfig::from_env();
      assert_eq!(config.format, LogFormat::Json);
      assert_eq!(config.filter, "debug");
    });

    temp_env::with_vars([("LOG_FORMAT", None::<&str>), ("RUST_LOG", None)], || {
      let config = LoggingConfig::from_env();
      assert_eq!(config.format, LogFormat::Pretty);
      assert_eq!(config.filter, DEFAULT_FILTER);
    });
  }

  #[test]
  fn test_init_twice_does_not_panic() {
    let config = LoggingConfig::default();
    config.init();
    config.init();
  }
}
