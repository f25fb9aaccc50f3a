//! Deterministic analysis layer for daily fitness metrics
//!
//! This module turns raw Google Fit day buckets into scored daily rows and
//! computes the rolling sleep-consistency score. The LLM only ever sees the
//! numbers produced here.

use crate::google_fit::{
  millis_to_date, AggregateResponse, Bucket, DataPoint, CALORIES_EXPENDED, HEART_RATE_BPM,
  HEART_RATE_SUMMARY, SLEEP_SEGMENT, STEP_COUNT_DELTA,
};
use crate::models::NewFitnessMetric;
use tracing::{debug, warn};

/// ---------------------------------------------------------------------------
/// Scoring Constants
/// ---------------------------------------------------------------------------

/// Sleep between these bounds (hours) earns a full quality score
const MIN_OPTIMAL_SLEEP_HOURS: f64 = 7.0;
const MAX_OPTIMAL_SLEEP_HOURS: f64 = 9.0;
/// Assumed deep-sleep share when the source reports no stages
const DEFAULT_DEEP_SLEEP_RATIO: f64 = 0.15;
/// Google Fit sleep stage code for deep sleep
const SLEEP_STAGE_DEEP: i64 = 4;

const BASELINE_RHR: f64 = 60.0;
const BASELINE_RECOVERY: f64 = 85.0;

/// Daily step count above which a day counts as active for macro estimates
const ACTIVE_DAY_STEPS: i64 = 8000;
/// HRV is only estimated from variability with more readings than this
const MIN_HRV_READINGS: usize = 10;

/// Rolling window of preceding days used for sleep consistency
const CONSISTENCY_WINDOW_DAYS: usize = 7;
/// A day needs at least this many earlier rows before it gets a score
const CONSISTENCY_MIN_INDEX: usize = 2;

/// ---------------------------------------------------------------------------
/// Numeric Helpers
/// ---------------------------------------------------------------------------

/// Round to the nearest integer, halves away from negative infinity
pub fn round_half_up(value: f64) -> i64 {
  (value + 0.5).floor() as i64
}

pub fn mean(values: &[f64]) -> Option<f64> {
  if values.is_empty() {
    return None;
  }
  Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by n)
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
  let avg = mean(values)?;
  let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
  Some(variance.sqrt())
}

/// ---------------------------------------------------------------------------
/// Daily Scores
/// ---------------------------------------------------------------------------

/// Sleep score from duration (70%) and deep-sleep share (30%), clamped 0-100.
/// Duration quality is full between 7 and 9 hours, proportional below and
/// loses 10 points per extra hour above. A missing or zero deep-sleep figure
/// falls back to the default ratio.
pub fn sleep_score(total_minutes: i64, deep_minutes: Option<i64>) -> Option<i64> {
  if total_minutes <= 0 {
    return None;
  }

  let total = total_minutes as f64;
  let hours = total / 60.0;
  let quality = if hours < MIN_OPTIMAL_SLEEP_HOURS {
    hours / MIN_OPTIMAL_SLEEP_HOURS * 100.0
  } else if hours > MAX_OPTIMAL_SLEEP_HOURS {
    100.0 - (hours - MAX_OPTIMAL_SLEEP_HOURS) * 10.0
  } else {
    100.0
  };
  let deep_ratio = match deep_minutes {
    Some(deep) if deep != 0 => deep as f64 / total,
    _ => DEFAULT_DEEP_SLEEP_RATIO,
  };

  let score = quality * 0.7 + deep_ratio * 100.0 * 0.3;
  Some(round_half_up(score).clamp(0, 100))
}

/// Recovery from resting heart rate: 85 at 60 bpm, +1 per bpm below
/// (capped at 100), -1.5 per bpm above (floored at 0)
pub fn recovery_score(rhr: i64) -> i64 {
  let rhr = rhr as f64;
  let score = if rhr < BASELINE_RHR {
    (BASELINE_RECOVERY + (BASELINE_RHR - rhr)).min(100.0)
  } else {
    (BASELINE_RECOVERY - (rhr - BASELINE_RHR) * 1.5).max(0.0)
  };
  round_half_up(score)
}

/// Workout intensity: the larger of the step and calorie ratios, capped at 100
pub fn workout_intensity(steps: i64, calories: i64) -> Option<i64> {
  if steps <= 0 && calories <= 0 {
    return None;
  }
  let step_ratio = (steps as f64 / 15_000.0 * 100.0).min(100.0);
  let calorie_ratio = (calories as f64 / 3000.0 * 100.0).min(100.0);
  Some(round_half_up(step_ratio.max(calorie_ratio)))
}

/// HRV estimate. With enough heart-rate readings, three times their spread
/// (clamped 20-100); otherwise derived from resting heart rate (clamped 20-80).
pub fn hrv_estimate(hr_readings: &[i64], rhr: Option<i64>) -> Option<i64> {
  if hr_readings.len() > MIN_HRV_READINGS {
    let readings: Vec<f64> = hr_readings.iter().map(|&hr| hr as f64).collect();
    let spread = population_std_dev(&readings)?;
    return Some(round_half_up((spread * 3.0).clamp(20.0, 100.0)));
  }

  rhr.map(|rhr| (BASELINE_RHR as i64 - (rhr - BASELINE_RHR as i64)).clamp(20, 80))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Macros {
  pub protein: i64,
  pub carbs: i64,
  pub fats: i64,
}

/// Macro split in grams from burned calories. Active days lean on protein
/// and carbs (30/50/20); other days shift toward fat (25/45/30).
pub fn estimate_macros(calories: i64, steps: i64) -> Macros {
  if calories <= 0 {
    return Macros { protein: 0, carbs: 0, fats: 0 };
  }

  let (protein_pct, carbs_pct, fats_pct) = if steps > ACTIVE_DAY_STEPS {
    (0.30, 0.50, 0.20)
  } else {
    (0.25, 0.45, 0.30)
  };

  let calories = calories as f64;
  Macros {
    protein: round_half_up(calories * protein_pct / 4.0),
    carbs: round_half_up(calories * carbs_pct / 4.0),
    fats: round_half_up(calories * fats_pct / 9.0),
  }
}

/// ---------------------------------------------------------------------------
/// Bucket Transformation
/// ---------------------------------------------------------------------------

/// Raw totals collected from one day bucket before scoring
#[derive(Debug, Default)]
struct DayTotals {
  steps: i64,
  calories: i64,
  hr_readings: Vec<i64>,
  rhr: Option<i64>,
  total_sleep_minutes: i64,
  deep_sleep_minutes: Option<i64>,
}

impl DayTotals {
  fn has_data(&self) -> bool {
    self.steps > 0 || self.calories > 0 || self.total_sleep_minutes > 0 || self.rhr.is_some()
  }

  fn add_point(&mut self, data_type: &str, point: &DataPoint) {
    let Some(value) = point.value.first() else { return };

    match data_type {
      STEP_COUNT_DELTA => self.steps += value.int_val.unwrap_or(0),
      CALORIES_EXPENDED => self.calories += round_half_up(value.fp_val.unwrap_or(0.0)),
      HEART_RATE_BPM | HEART_RATE_SUMMARY => {
        let hr = match value.fp_val.filter(|v| *v != 0.0) {
          Some(bpm) => Some(round_half_up(bpm)),
          // Summary points carry min/average/max instead of a plain value
          None => value
            .map_val
            .iter()
            .find(|entry| entry.key == "min")
            .or_else(|| value.map_val.iter().find(|entry| entry.key == "average"))
            .and_then(|entry| entry.value.fp_val)
            .map(round_half_up),
        };

        if let Some(hr) = hr.filter(|hr| *hr > 0 && *hr < 200) {
          self.hr_readings.push(hr);
          self.rhr = Some(self.rhr.map_or(hr, |current| current.min(hr)));
        }
      }
      SLEEP_SEGMENT => {
        let minutes = round_half_up(
          (point.end_time_nanos - point.start_time_nanos) as f64 / 1_000_000_000.0 / 60.0,
        );
        self.total_sleep_minutes += minutes;
        if value.int_val == Some(SLEEP_STAGE_DEEP) {
          self.deep_sleep_minutes = Some(self.deep_sleep_minutes.unwrap_or(0) + minutes);
        }
      }
      _ => {}
    }
  }

  fn into_metric(self, user_id: &str, date: chrono::NaiveDate) -> NewFitnessMetric {
    let macros = estimate_macros(self.calories, self.steps);

    NewFitnessMetric {
      user_id: user_id.to_string(),
      date,
      rhr: self.rhr,
      hrv: hrv_estimate(&self.hr_readings, self.rhr),
      sleep_score: sleep_score(self.total_sleep_minutes, self.deep_sleep_minutes),
      sleep_consistency: None,
      workout_intensity: workout_intensity(self.steps, self.calories),
      calories: Some(self.calories),
      protein: Some(macros.protein),
      carbs: Some(macros.carbs),
      fats: Some(macros.fats),
      steps: Some(self.steps),
      deep_sleep_minutes: self.deep_sleep_minutes,
      total_sleep_minutes: (self.total_sleep_minutes > 0).then_some(self.total_sleep_minutes),
      spo2: None,
      recovery_score: self.rhr.map(recovery_score),
    }
  }
}

fn transform_bucket(bucket: &Bucket, user_id: &str) -> Option<NewFitnessMetric> {
  let Some(date) = millis_to_date(bucket.start_time_millis) else {
    warn!(start = bucket.start_time_millis, "Skipping bucket with invalid start time");
    return None;
  };

  let mut totals = DayTotals::default();
  for dataset in &bucket.dataset {
    let Some(data_type) = dataset.data_type_name() else { continue };
    for point in &dataset.point {
      totals.add_point(data_type, point);
    }
  }

  if !totals.has_data() {
    return None;
  }
  Some(totals.into_metric(user_id, date))
}

/// Turn day buckets into metric rows for the user. Days without any steps,
/// calories, sleep or heart rate are dropped.
pub fn transform_fitness_data(response: &AggregateResponse, user_id: &str) -> Vec<NewFitnessMetric> {
  let metrics: Vec<NewFitnessMetric> = response
    .bucket
    .iter()
    .filter_map(|bucket| transform_bucket(bucket, user_id))
    .collect();

  debug!(
    buckets = response.bucket.len(),
    days = metrics.len(),
    "Transformed Google Fit buckets"
  );
  metrics
}

/// ---------------------------------------------------------------------------
/// Sleep Consistency
/// ---------------------------------------------------------------------------

/// Rolling sleep consistency for a date-ordered series of sleep scores.
///
/// A row gets a value when it has a sleep score and at least two rows come
/// before it. The window is the (non-null) scores of up to seven preceding
/// rows plus its own; the value is `100 - 2 * stddev`, floored at 0.
pub fn compute_sleep_consistency(scores: &[Option<i64>]) -> Vec<Option<i64>> {
  let mut consistency = vec![None; scores.len()];

  for (i, score) in scores.iter().enumerate().skip(CONSISTENCY_MIN_INDEX) {
    let Some(current) = score else { continue };

    let start = i.saturating_sub(CONSISTENCY_WINDOW_DAYS);
    let mut window: Vec<f64> = scores[start..i].iter().flatten().map(|&s| s as f64).collect();
    window.push(*current as f64);

    if let Some(spread) = population_std_dev(&window) {
      consistency[i] = Some(round_half_up((100.0 - spread * 2.0).max(0.0)));
    }
  }

  consistency
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
