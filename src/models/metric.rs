use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One stored day of metrics for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FitnessMetric {
  pub id: i64,
  pub user_id: String,
  pub date: NaiveDate,
  pub rhr: Option<i64>,
  pub hrv: Option<i64>,
  pub sleep_score: Option<i64>,
  pub sleep_consistency: Option<i64>,
  pub workout_intensity: Option<i64>,
  pub calories: Option<i64>,
  pub protein: Option<i64>,
  pub carbs: Option<i64>,
  pub fats: Option<i64>,
  pub steps: Option<i64>,
  pub deep_sleep_minutes: Option<i64>,
  pub total_sleep_minutes: Option<i64>,
  pub spo2: Option<f64>,
  pub recovery_score: Option<i64>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

/// For upserting a day of metrics (without id, timestamps)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFitnessMetric {
  pub user_id: String,
  pub date: NaiveDate,
  pub rhr: Option<i64>,
  pub hrv: Option<i64>,
  pub sleep_score: Option<i64>,
  pub sleep_consistency: Option<i64>,
  pub workout_intensity: Option<i64>,
  pub calories: Option<i64>,
  pub protein: Option<i64>,
  pub carbs: Option<i64>,
  pub fats: Option<i64>,
  pub steps: Option<i64>,
  pub deep_sleep_minutes: Option<i64>,
  pub total_sleep_minutes: Option<i64>,
  pub spo2: Option<f64>,
  pub recovery_score: Option<i64>,
}

impl From<FitnessMetric> for NewFitnessMetric {
  fn from(m: FitnessMetric) -> Self {
    Self {
      user_id: m.user_id,
      date: m.date,
      rhr: m.rhr,
      hrv: m.hrv,
      sleep_score: m.sleep_score,
      sleep_consistency: m.sleep_consistency,
      workout_intensity: m.workout_intensity,
      calories: m.calories,
      protein: m.protein,
      carbs: m.carbs,
      fats: m.fats,
      steps: m.steps,
      deep_sleep_minutes: m.deep_sleep_minutes,
      total_sleep_minutes: m.total_sleep_minutes,
      spo2: m.spo2,
      recovery_score: m.recovery_score,
    }
  }
}
