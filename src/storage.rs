//! Persistence layer: users, OAuth tokens, daily metrics and insights
//!
//! Every metric write is followed by a sleep-consistency recomputation in the
//! same transaction, so readers never see a stale rolling score.

use crate::analysis::compute_sleep_consistency;
use crate::db::DbPool;
use crate::models::{
  FitnessMetric, GoogleFitToken, Insight, NewFitnessMetric, NewGoogleFitToken, NewInsight,
  UpsertUser, User,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use tracing::debug;

/// Default number of days returned by `get_fitness_metrics`
pub const DEFAULT_METRIC_DAYS: i64 = 30;

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),
}

/// ---------------------------------------------------------------------------
/// Users
/// ---------------------------------------------------------------------------

pub async fn get_user(db: &DbPool, id: &str) -> Result<Option<User>, StorageError> {
  let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
    .bind(id)
    .fetch_optional(db)
    .await?;
  Ok(user)
}

/// Insert or refresh a user. Claims that are absent keep their stored value.
pub async fn upsert_user(db: &DbPool, user: &UpsertUser) -> Result<User, StorageError> {
  let now = Utc::now();
  let stored = sqlx::query_as::<_, User>(
    r#"
    INSERT INTO users (id, email, first_name, last_name, profile_image_url, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
    ON CONFLICT(id) DO UPDATE SET
      email = COALESCE(excluded.email, users.email),
      first_name = COALESCE(excluded.first_name, users.first_name),
      last_name = COALESCE(excluded.last_name, users.last_name),
      profile_image_url = COALESCE(excluded.profile_image_url, users.profile_image_url),
      updated_at = excluded.updated_at
    RETURNING *
    "#,
  )
  .bind(&user.id)
  .bind(&user.email)
  .bind(&user.first_name)
  .bind(&user.last_name)
  .bind(&user.profile_image_url)
  .bind(now)
  .fetch_one(db)
  .await?;

  Ok(stored)
}

/// ---------------------------------------------------------------------------
/// Google Fit Tokens
/// ---------------------------------------------------------------------------

pub async fn get_token(db: &DbPool, user_id: &str) -> Result<Option<GoogleFitToken>, StorageError> {
  let token =
    sqlx::query_as::<_, GoogleFitToken>("SELECT * FROM google_fit_tokens WHERE user_id = ?1")
      .bind(user_id)
      .fetch_optional(db)
      .await?;
  Ok(token)
}

pub async fn save_token(
  db: &DbPool,
  token: &NewGoogleFitToken,
) -> Result<GoogleFitToken, StorageError> {
  let now = Utc::now();
  let stored = sqlx::query_as::<_, GoogleFitToken>(
    r#"
    INSERT INTO google_fit_tokens (user_id, access_token, refresh_token, expires_at, scope, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
    ON CONFLICT(user_id) DO UPDATE SET
      access_token = excluded.access_token,
      refresh_token = excluded.refresh_token,
      expires_at = excluded.expires_at,
      scope = excluded.scope,
      updated_at = excluded.updated_at
    RETURNING *
    "#,
  )
  .bind(&token.user_id)
  .bind(&token.access_token)
  .bind(&token.refresh_token)
  .bind(token.expires_at)
  .bind(&token.scope)
  .bind(now)
  .fetch_one(db)
  .await?;

  Ok(stored)
}

/// Store a refreshed access token. A `None` refresh token keeps the old one.
pub async fn update_access_token(
  db: &DbPool,
  user_id: &str,
  access_token: &str,
  expires_at: DateTime<Utc>,
  refresh_token: Option<&str>,
) -> Result<Option<GoogleFitToken>, StorageError> {
  let updated = sqlx::query_as::<_, GoogleFitToken>(
    r#"
    UPDATE google_fit_tokens SET
      access_token = ?1,
      expires_at = ?2,
      refresh_token = COALESCE(?3, refresh_token),
      updated_at = ?4
    WHERE user_id = ?5
    RETURNING *
    "#,
  )
  .bind(access_token)
  .bind(expires_at)
  .bind(refresh_token)
  .bind(Utc::now())
  .bind(user_id)
  .fetch_optional(db)
  .await?;

  Ok(updated)
}

pub async fn delete_token(db: &DbPool, user_id: &str) -> Result<(), StorageError> {
  sqlx::query("DELETE FROM google_fit_tokens WHERE user_id = ?1")
    .bind(user_id)
    .execute(db)
    .await?;
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Fitness Metrics
/// ---------------------------------------------------------------------------

/// Latest `days` rows for the user, returned oldest to newest
pub async fn get_fitness_metrics(
  db: &DbPool,
  user_id: &str,
  days: i64,
) -> Result<Vec<FitnessMetric>, StorageError> {
  let mut metrics = sqlx::query_as::<_, FitnessMetric>(
    "SELECT * FROM fitness_metrics WHERE user_id = ?1 ORDER BY date DESC LIMIT ?2",
  )
  .bind(user_id)
  .bind(days)
  .fetch_all(db)
  .await?;

  metrics.reverse();
  Ok(metrics)
}

pub async fn get_fitness_metric_by_date(
  db: &DbPool,
  user_id: &str,
  date: NaiveDate,
) -> Result<Option<FitnessMetric>, StorageError> {
  let metric = sqlx::query_as::<_, FitnessMetric>(
    "SELECT * FROM fitness_metrics WHERE user_id = ?1 AND date = ?2",
  )
  .bind(user_id)
  .bind(date)
  .fetch_optional(db)
  .await?;
  Ok(metric)
}

/// Insert or replace one day, then recompute sleep consistency for the user
pub async fn upsert_fitness_metric(
  db: &DbPool,
  metric: &NewFitnessMetric,
) -> Result<FitnessMetric, StorageError> {
  let mut tx = db.begin().await?;
  write_metric(&mut tx, metric).await?;
  recompute_sleep_consistency(&mut tx, &metric.user_id).await?;

  let stored = sqlx::query_as::<_, FitnessMetric>(
    "SELECT * FROM fitness_metrics WHERE user_id = ?1 AND date = ?2",
  )
  .bind(&metric.user_id)
  .bind(metric.date)
  .fetch_one(&mut *tx)
  .await?;

  tx.commit().await?;
  Ok(stored)
}

/// Upsert a batch of days and recompute consistency once per affected user
pub async fn save_fitness_metrics(
  db: &DbPool,
  metrics: &[NewFitnessMetric],
) -> Result<usize, StorageError> {
  if metrics.is_empty() {
    return Ok(0);
  }

  let mut tx = db.begin().await?;
  for metric in metrics {
    write_metric(&mut tx, metric).await?;
  }

  let users: BTreeSet<&str> = metrics.iter().map(|m| m.user_id.as_str()).collect();
  for user_id in users {
    recompute_sleep_consistency(&mut tx, user_id).await?;
  }

  tx.commit().await?;
  Ok(metrics.len())
}

/// Recompute the rolling sleep-consistency score for every day of a user.
/// Returns the number of rows whose value changed.
pub async fn update_sleep_consistency(db: &DbPool, user_id: &str) -> Result<usize, StorageError> {
  let mut tx = db.begin().await?;
  let changed = recompute_sleep_consistency(&mut tx, user_id).await?;
  tx.commit().await?;
  Ok(changed)
}

async fn write_metric(
  conn: &mut SqliteConnection,
  metric: &NewFitnessMetric,
) -> Result<(), StorageError> {
  let now = Utc::now();
  sqlx::query(
    r#"
    INSERT INTO fitness_metrics (
      user_id, date, rhr, hrv, sleep_score, sleep_consistency, workout_intensity,
      calories, protein, carbs, fats, steps, deep_sleep_minutes, total_sleep_minutes,
      spo2, recovery_score, created_at, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
    ON CONFLICT(user_id, date) DO UPDATE SET
      rhr = excluded.rhr,
      hrv = excluded.hrv,
      sleep_score = excluded.sleep_score,
      sleep_consistency = excluded.sleep_consistency,
      workout_intensity = excluded.workout_intensity,
      calories = excluded.calories,
      protein = excluded.protein,
      carbs = excluded.carbs,
      fats = excluded.fats,
      steps = excluded.steps,
      deep_sleep_minutes = excluded.deep_sleep_minutes,
      total_sleep_minutes = excluded.total_sleep_minutes,
      spo2 = excluded.spo2,
      recovery_score = excluded.recovery_score,
      updated_at = excluded.updated_at
    "#,
  )
  .bind(&metric.user_id)
  .bind(metric.date)
  .bind(metric.rhr)
  .bind(metric.hrv)
  .bind(metric.sleep_score)
  .bind(metric.sleep_consistency)
  .bind(metric.workout_intensity)
  .bind(metric.calories)
  .bind(metric.protein)
  .bind(metric.carbs)
  .bind(metric.fats)
  .bind(metric.steps)
  .bind(metric.deep_sleep_minutes)
  .bind(metric.total_sleep_minutes)
  .bind(metric.spo2)
  .bind(metric.recovery_score)
  .bind(now)
  .execute(&mut *conn)
  .await?;

  Ok(())
}

async fn recompute_sleep_consistency(
  conn: &mut SqliteConnection,
  user_id: &str,
) -> Result<usize, StorageError> {
  let rows: Vec<(NaiveDate, Option<i64>, Option<i64>)> = sqlx::query_as(
    "SELECT date, sleep_score, sleep_consistency FROM fitness_metrics WHERE user_id = ?1 ORDER BY date ASC",
  )
  .bind(user_id)
  .fetch_all(&mut *conn)
  .await?;

  let scores: Vec<Option<i64>> = rows.iter().map(|(_, score, _)| *score).collect();
  let computed = compute_sleep_consistency(&scores);

  let mut changed = 0;
  for ((date, _, stored), value) in rows.iter().zip(computed) {
    let Some(value) = value else { continue };
    if *stored == Some(value) {
      continue;
    }

    sqlx::query("UPDATE fitness_metrics SET sleep_consistency = ?1 WHERE user_id = ?2 AND date = ?3")
      .bind(value)
      .bind(user_id)
      .bind(date)
      .execute(&mut *conn)
      .await?;
    changed += 1;
  }

  debug!(user_id, days = rows.len(), changed, "Sleep consistency recomputed");
  Ok(changed)
}

/// ---------------------------------------------------------------------------
/// Insights
/// ---------------------------------------------------------------------------

pub async fn get_latest_insight(
  db: &DbPool,
  user_id: &str,
) -> Result<Option<Insight>, StorageError> {
  let insight = sqlx::query_as::<_, Insight>(
    "SELECT * FROM insights WHERE user_id = ?1 ORDER BY generated_at DESC, id DESC LIMIT 1",
  )
  .bind(user_id)
  .fetch_optional(db)
  .await?;
  Ok(insight)
}

pub async fn save_insight(db: &DbPool, insight: &NewInsight) -> Result<Insight, StorageError> {
  let stored = sqlx::query_as::<_, Insight>(
    r#"
    INSERT INTO insights (user_id, content, type, generated_at, is_read)
    VALUES (?1, ?2, ?3, ?4, ?5)
    RETURNING *
    "#,
  )
  .bind(&insight.user_id)
  .bind(&insight.content)
  .bind(insight.insight_type.as_str())
  .bind(Utc::now())
  .bind(insight.is_read)
  .fetch_one(db)
  .await?;
  Ok(stored)
}

/// Mark an insight as read. Returns false when the user has no such insight.
pub async fn mark_insight_as_read(
  db: &DbPool,
  user_id: &str,
  insight_id: i64,
) -> Result<bool, StorageError> {
  let result = sqlx::query("UPDATE insights SET is_read = 1 WHERE id = ?1 AND user_id = ?2")
    .bind(insight_id)
    .bind(user_id)
    .execute(db)
    .await?;
  Ok(result.rows_affected() > 0)
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
