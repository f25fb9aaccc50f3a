use crate::config::AppConfig;
use crate::storage::StorageError;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

pub type DbPool = SqlitePool;

/// Application state shared by every request handler
pub struct AppState {
  pub db: DbPool,
  pub config: AppConfig,
}

/// Initialize the database connection pool and run migrations
pub async fn initialize_db(database_url: &str) -> Result<DbPool, StorageError> {
  info!(database_url, "Initializing database");

  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect(database_url)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  info!("Database initialized successfully");

  Ok(pool)
}
