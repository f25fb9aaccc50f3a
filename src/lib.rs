mod analysis;
mod config;
mod dashboard;
mod db;
mod google_fit;
mod insights;
mod llm;
mod logging;
mod models;
mod routes;
mod storage;

#[cfg(test)]
mod test_utils;

use config::{AppConfig, ConfigError};
use db::AppState;
use std::sync::Arc;
use storage::StorageError;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error("Server error: {0}")]
  Io(#[from] std::io::Error),
}

/// Load configuration, open the database and serve the API until Ctrl-C
pub async fn run() -> Result<(), StartupError> {
  // Load environment variables from .env file
  dotenvy::dotenv().ok();

  let config = AppConfig::from_env()?;
  config.logging.init();
  config.log_disabled_features();

  let pool = db::initialize_db(&config.database_url).await?;
  let addr = config.bind_addr()?;

  let state = Arc::new(AppState { db: pool.clone(), config });
  let app = routes::router(state);

  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!(%addr, "Server listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  pool.close().await;
  info!("Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!("Shutdown signal received");
}
