//! Environment-only configuration
//!
//! Everything is read once at start-up. A `.env` file in the working
//! directory is loaded first (see `lib::run`).

use crate::google_fit::GoogleFitConfig;
use crate::llm::LlmConfig;
use crate::logging::LoggingConfig;
use std::env;
use std::net::SocketAddr;
use tracing::warn;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DATABASE_URL: &str = "sqlite://fitdash.db?mode=rwc";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Invalid value for {key}: {value}")]
  InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub host: String,
  pub port: u16,
  pub database_url: String,
  /// None when GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET are not set
  pub google: Option<GoogleFitConfig>,
  /// Why `google` is None, reported once logging is up
  pub google_disabled_reason: Option<String>,
  pub llm: LlmConfig,
  pub logging: LoggingConfig,
}

impl AppConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    let port = match env::var("PORT") {
      Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
        key: "PORT".into(),
        value: raw.clone(),
      })?,
      Err(_) => DEFAULT_PORT,
    };

    let (google, google_disabled_reason) = match GoogleFitConfig::from_env() {
      Ok(config) => (Some(config), None),
      Err(e) => (None, Some(e.to_string())),
    };

    Ok(Self {
      host: env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.into()),
      port,
      database_url: env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
      google,
      google_disabled_reason,
      llm: LlmConfig::from_env(),
      logging: LoggingConfig::from_env(),
    })
  }

  /// Warn about integrations that run degraded. Call after logging is initialized.
  pub fn log_disabled_features(&self) {
    if let Some(reason) = &self.google_disabled_reason {
      warn!(reason = %reason, "Google Fit integration disabled");
    }
    if self.llm.api_key.is_none() {
      warn!("OPENAI_API_KEY not set, insights will use fallback text");
    }
  }

  pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
    let raw = format!("{}:{}", self.host, self.port);
    raw
      .parse()
      .map_err(|_| ConfigError::InvalidValue { key: "HOST".into(), value: raw })
  }
}
