//! Test utilities and helpers for unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Mock data factories
//! - Helper assertions

use crate::google_fit::{DataPoint, PointValue};
use crate::models::{FitnessMetric, NewFitnessMetric, NewGoogleFitToken, UpsertUser};
use crate::storage;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;

pub const TEST_USER_ID: &str = "test-user";

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  // Run migrations
  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// Insert a user row so token, metric and insight rows can reference it
pub async fn seed_test_user(pool: &SqlitePool, id: &str) {
  storage::upsert_user(
    pool,
    &UpsertUser {
      id: id.to_string(),
      email: Some(format!("{}@example.com", id)),
      first_name: Some("Test".into()),
      ..Default::default()
    },
  )
  .await
  .expect("Failed to seed user");
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

/// Token with access token `access-token` and refresh token `refresh-token`
pub fn mock_token(user_id: &str, expires_at: DateTime<Utc>) -> NewGoogleFitToken {
  NewGoogleFitToken {
    user_id: user_id.to_string(),
    access_token: "access-token".into(),
    refresh_token: Some("refresh-token".into()),
    expires_at,
    scope: "https://www.googleapis.com/auth/fitness.activity.read".into(),
  }
}

/// A day with only a sleep score set
pub fn mock_metric(user_id: &str, date: NaiveDate, sleep_score: Option<i64>) -> NewFitnessMetric {
  NewFitnessMetric {
    user_id: user_id.to_string(),
    date,
    sleep_score,
    ..Default::default()
  }
}

/// A stored row with every value missing, for pure transforms
pub fn mock_stored_metric(user_id: &str, date: NaiveDate) -> FitnessMetric {
  FitnessMetric {
    id: 0,
    user_id: user_id.to_string(),
    date,
    rhr: None,
    hrv: None,
    sleep_score: None,
    sleep_consistency: None,
    workout_intensity: None,
    calories: None,
    protein: None,
    carbs: None,
    fats: None,
    steps: None,
    deep_sleep_minutes: None,
    total_sleep_minutes: None,
    spo2: None,
    recovery_score: None,
    created_at: None,
    updated_at: None,
  }
}

/// Instantaneous heart-rate sample at `millis`
pub fn hr_point(millis: i64, bpm: f64) -> DataPoint {
  DataPoint {
    start_time_nanos: millis * 1_000_000,
    end_time_nanos: millis * 1_000_000,
    data_type_name: Some(crate::google_fit::HEART_RATE_BPM.into()),
    value: vec![PointValue {
      fp_val: Some(bpm),
      ..Default::default()
    }],
  }
}

/// ---------------------------------------------------------------------------
/// Time Helpers
/// ---------------------------------------------------------------------------

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
  NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    // Verify key tables exist
    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('users', 'google_fit_tokens', 'fitness_metrics', 'insights')",
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 4, "Expected 4 tables, got {}", tables.len());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_seed_user_is_retrievable() {
    let pool = setup_test_db().await;
    seed_test_user(&pool, TEST_USER_ID).await;

    let user = storage::get_user(&pool, TEST_USER_ID).await.unwrap().expect("seeded user");
    assert_eq!(user.email.as_deref(), Some("test-user@example.com"));

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_mock_factories_create_valid_data() {
    let metric = mock_metric(TEST_USER_ID, date(2024, 3, 1), Some(75));
    assert_eq!(metric.sleep_score, Some(75));
    assert!(metric.steps.is_none());

    let point = hr_point(1_000, 61.0);
    assert_eq!(point.start_time_nanos, 1_000_000_000);
    assert_eq!(point.value[0].fp_val, Some(61.0));
  }
}
