use super::{authenticate, ApiError};
use crate::db::AppState;
use crate::models::{FitnessMetric, NewFitnessMetric};
use crate::storage::{self, DEFAULT_METRIC_DAYS};
use axum::{
  extract::{rejection::JsonRejection, Query, State},
  http::HeaderMap,
  routing::get,
  Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub(crate) struct DaysQuery {
  days: Option<String>,
}

impl DaysQuery {
  /// Requested day count; missing, unparsable or non-positive values fall
  /// back to the default
  pub(crate) fn days(&self) -> i64 {
    self
      .days
      .as_deref()
      .and_then(|raw| raw.trim().parse::<i64>().ok())
      .filter(|days| *days > 0)
      .unwrap_or(DEFAULT_METRIC_DAYS)
  }
}

/// Partial day record; absent fields keep their stored value
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricPatch {
  date: NaiveDate,
  rhr: Option<i64>,
  hrv: Option<i64>,
  sleep_score: Option<i64>,
  sleep_consistency: Option<i64>,
  workout_intensity: Option<i64>,
  calories: Option<i64>,
  protein: Option<i64>,
  carbs: Option<i64>,
  fats: Option<i64>,
  steps: Option<i64>,
  deep_sleep_minutes: Option<i64>,
  total_sleep_minutes: Option<i64>,
  spo2: Option<f64>,
  recovery_score: Option<i64>,
}

impl MetricPatch {
  fn validate(&self) -> Result<(), ApiError> {
    let scores = [
      ("sleepScore", self.sleep_score),
      ("sleepConsistency", self.sleep_consistency),
      ("workoutIntensity", self.workout_intensity),
      ("recoveryScore", self.recovery_score),
    ];
    for (field, value) in scores {
      if let Some(value) = value.filter(|v| !(0..=100).contains(v)) {
        return Err(ApiError::bad_request(format!("{} must be between 0 and 100, got {}", field, value)));
      }
    }

    let counts = [
      ("rhr", self.rhr),
      ("hrv", self.hrv),
      ("calories", self.calories),
      ("protein", self.protein),
      ("carbs", self.carbs),
      ("fats", self.fats),
      ("steps", self.steps),
      ("deepSleepMinutes", self.deep_sleep_minutes),
      ("totalSleepMinutes", self.total_sleep_minutes),
    ];
    for (field, value) in counts {
      if let Some(value) = value.filter(|v| *v < 0) {
        return Err(ApiError::bad_request(format!("{} must not be negative, got {}", field, value)));
      }
    }

    if let Some(spo2) = self.spo2.filter(|v| !(0.0..=100.0).contains(v)) {
      return Err(ApiError::bad_request(format!("spo2 must be between 0 and 100, got {}", spo2)));
    }
    Ok(())
  }

  fn apply_to(self, metric: &mut NewFitnessMetric) {
    fn merge<T>(target: &mut Option<T>, value: Option<T>) {
      if value.is_some() {
        *target = value;
      }
    }

    merge(&mut metric.rhr, self.rhr);
    merge(&mut metric.hrv, self.hrv);
    merge(&mut metric.sleep_score, self.sleep_score);
    merge(&mut metric.sleep_consistency, self.sleep_consistency);
    merge(&mut metric.workout_intensity, self.workout_intensity);
    merge(&mut metric.calories, self.calories);
    merge(&mut metric.protein, self.protein);
    merge(&mut metric.carbs, self.carbs);
    merge(&mut metric.fats, self.fats);
    merge(&mut metric.steps, self.steps);
    merge(&mut metric.deep_sleep_minutes, self.deep_sleep_minutes);
    merge(&mut metric.total_sleep_minutes, self.total_sleep_minutes);
    merge(&mut metric.spo2, self.spo2);
    merge(&mut metric.recovery_score, self.recovery_score);
  }
}

/// Daily metric routes
pub struct MetricsRoutes;

impl MetricsRoutes {
  pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
      .route("/api/metrics", get(Self::handle_list).post(Self::handle_upsert))
      .with_state(state)
  }

  async fn handle_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DaysQuery>,
  ) -> Result<Json<Vec<FitnessMetric>>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let metrics = storage::get_fitness_metrics(&state.db, &user.id, query.days()).await?;
    Ok(Json(metrics))
  }

  async fn handle_upsert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<MetricPatch>, JsonRejection>,
  ) -> Result<Json<FitnessMetric>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let Json(patch) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    patch.validate()?;

    let mut metric = match storage::get_fitness_metric_by_date(&state.db, &user.id, patch.date).await? {
      Some(existing) => NewFitnessMetric::from(existing),
      None => NewFitnessMetric {
        user_id: user.id.clone(),
        date: patch.date,
        ..Default::default()
      },
    };
    patch.apply_to(&mut metric);

    let stored = storage::upsert_fitness_metric(&state.db, &metric).await?;
    debug!(user_id = %user.id, date = %stored.date, "Metric saved");
    Ok(Json(stored))
  }
}
