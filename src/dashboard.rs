//! Chart-ready series for the dashboard
//!
//! Each chart takes the same date-ordered metric rows. Missing values
//! render as 0 so the charts never have gaps.

use crate::analysis::{mean, round_half_up};
use crate::models::FitnessMetric;
use chrono::NaiveDate;
use serde::Serialize;

const RADAR_DAYS: usize = 7;
const NERVE_CHECK_DAYS: usize = 14;
const LOAD_BALANCER_DAYS: usize = 7;
const HEATMAP_WEEKS: usize = 4;
const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
/// Bubble size when a day has no resting heart rate
const DEFAULT_RADAR_RHR: i64 = 60;
const MAX_STRAIN: i64 = 20;
const SIGNATURE_DAYS: usize = 7;
const MIN_SIGNATURE_ROWS: usize = 3;
const MIN_CORRELATION_POINTS: usize = 3;
const MIN_TREND_POINTS: usize = 5;
/// Percent change between recent and earlier means that counts as a trend
const TREND_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
  pub recovery_radar: Vec<RadarPoint>,
  pub nerve_check: Vec<NerveCheckPoint>,
  pub mind_shield: Vec<HeatmapCell>,
  pub wellness_triangle: Vec<WellnessAxis>,
  pub load_balancer: Vec<LoadPoint>,
  pub sync_index: SyncIndex,
  pub readiness_score: Option<i64>,
  pub readiness_change: Option<i64>,
  pub strain_score: Option<i64>,
  pub vitality_score: i64,
  pub biometric_signature: BiometricSignature,
}

/// Bubble: intensity vs. sleep, sized by RHR
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarPoint {
  pub x: i64,
  pub y: i64,
  pub z: i64,
  pub name: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NerveCheckPoint {
  pub date: NaiveDate,
  pub hrv: i64,
  pub sleep_consistency: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapCell {
  pub day: &'static str,
  pub week: String,
  pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WellnessAxis {
  pub subject: &'static str,
  #[serde(rename = "A")]
  pub value: i64,
  pub full_mark: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadPoint {
  pub date: NaiveDate,
  pub strain: i64,
  pub recovery: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncIndex {
  pub hrv: i64,
  pub sleep: i64,
  pub recovery: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
  InsufficientData,
  SleepRecoveryCoupling,
  ResilienceRising,
  EliteRecovery,
  CircadianLock,
  PeakAdaptation,
  Variance,
}

/// One-line pattern read from the last week of rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiometricSignature {
  pub kind: SignatureKind,
  pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
  Improving,
  Declining,
  Stable,
}

pub fn build_dashboard(metrics: &[FitnessMetric]) -> DashboardData {
  let sync_index = sync_index(metrics);
  let vitality_score = vitality_score(metrics, &sync_index);

  DashboardData {
    recovery_radar: recovery_radar(metrics),
    nerve_check: nerve_check(metrics),
    mind_shield: mind_shield(metrics),
    wellness_triangle: wellness_triangle(metrics),
    load_balancer: load_balancer(metrics),
    sync_index,
    readiness_score: metrics.last().map(readiness_score),
    readiness_change: readiness_change(metrics),
    strain_score: metrics.last().map(strain_score),
    vitality_score,
    biometric_signature: biometric_signature(metrics),
  }
}

fn last_n(metrics: &[FitnessMetric], n: usize) -> &[FitnessMetric] {
  &metrics[metrics.len().saturating_sub(n)..]
}

fn or_zero(value: Option<i64>) -> i64 {
  value.unwrap_or(0)
}

pub fn recovery_radar(metrics: &[FitnessMetric]) -> Vec<RadarPoint> {
  last_n(metrics, RADAR_DAYS)
    .iter()
    .map(|m| RadarPoint {
      x: or_zero(m.workout_intensity),
      y: or_zero(m.sleep_score),
      z: m.rhr.filter(|rhr| *rhr != 0).unwrap_or(DEFAULT_RADAR_RHR),
      name: m.date,
    })
    .collect()
}

pub fn nerve_check(metrics: &[FitnessMetric]) -> Vec<NerveCheckPoint> {
  last_n(metrics, NERVE_CHECK_DAYS)
    .iter()
    .map(|m| NerveCheckPoint {
      date: m.date,
      hrv: or_zero(m.hrv),
      sleep_consistency: or_zero(m.sleep_consistency),
    })
    .collect()
}

/// 4x7 heatmap of sleep consistency over the last 28 rows. Rows are laid
/// out in order; with fewer than 28 rows the leading cells stay 0.
pub fn mind_shield(metrics: &[FitnessMetric]) -> Vec<HeatmapCell> {
  let cells = HEATMAP_WEEKS * WEEKDAYS.len();
  let missing = cells.saturating_sub(metrics.len());
  let window = last_n(metrics, cells);

  (0..cells)
    .map(|index| {
      let value = index
        .checked_sub(missing)
        .and_then(|i| window.get(i))
        .and_then(|m| m.sleep_consistency)
        .unwrap_or(0);

      HeatmapCell {
        day: WEEKDAYS[index % WEEKDAYS.len()],
        week: format!("W{}", index / WEEKDAYS.len() + 1),
        value,
      }
    })
    .collect()
}

/// RHR mapped onto 0-100 where lower is better: 40 bpm scores 100
pub fn normalize_rhr(rhr: Option<i64>) -> i64 {
  match rhr {
    Some(rhr) if rhr != 0 => (100 - (rhr - 40) * 2).clamp(0, 100),
    _ => 0,
  }
}

pub fn wellness_triangle(metrics: &[FitnessMetric]) -> Vec<WellnessAxis> {
  let Some(latest) = metrics.last() else {
    return Vec::new();
  };

  let axis = |subject, value| WellnessAxis { subject, value, full_mark: 100 };
  vec![
    axis("Recovery", or_zero(latest.recovery_score)),
    axis("HRV", or_zero(latest.hrv)),
    axis("Sleep", or_zero(latest.sleep_score)),
    axis("RHR", normalize_rhr(latest.rhr)),
  ]
}

pub fn load_balancer(metrics: &[FitnessMetric]) -> Vec<LoadPoint> {
  last_n(metrics, LOAD_BALANCER_DAYS)
    .iter()
    .map(|m| LoadPoint {
      date: m.date,
      strain: or_zero(m.workout_intensity),
      recovery: or_zero(m.recovery_score),
    })
    .collect()
}

pub fn sync_index(metrics: &[FitnessMetric]) -> SyncIndex {
  metrics
    .last()
    .map(|latest| SyncIndex {
      hrv: or_zero(latest.hrv),
      sleep: or_zero(latest.sleep_score),
      recovery: or_zero(latest.recovery_score),
    })
    .unwrap_or_default()
}

/// ---------------------------------------------------------------------------
/// Headline Scores
/// ---------------------------------------------------------------------------

/// Weighted blend of sleep, recovery and HRV, capped at 100.
/// Missing values count as 70, 70 and 50.
pub fn readiness_score(metric: &FitnessMetric) -> i64 {
  let sleep = metric.sleep_score.unwrap_or(70) as f64;
  let recovery = metric.recovery_score.unwrap_or(70) as f64;
  let hrv = metric.hrv.unwrap_or(50) as f64;
  round_half_up(sleep * 0.4 + recovery * 0.3 + hrv * 0.3).min(100)
}

/// Readiness of the latest day minus the day before
pub fn readiness_change(metrics: &[FitnessMetric]) -> Option<i64> {
  match metrics {
    [.., previous, latest] => Some(readiness_score(latest) - readiness_score(previous)),
    _ => None,
  }
}

/// Day strain on a 0-20 scale from intensity and steps
pub fn strain_score(metric: &FitnessMetric) -> i64 {
  let intensity = or_zero(metric.workout_intensity) as f64;
  let steps = or_zero(metric.steps) as f64;
  round_half_up(intensity * 0.1 + steps / 1000.0).min(MAX_STRAIN)
}

pub fn vitality_score(metrics: &[FitnessMetric], index: &SyncIndex) -> i64 {
  if metrics.is_empty() {
    return 0;
  }
  round_half_up((index.recovery + index.hrv + index.sleep) as f64 / 3.0)
}

/// ---------------------------------------------------------------------------
/// Biometric Signature
/// ---------------------------------------------------------------------------

/// Pearson correlation. 0 with fewer than 3 pairs or no variance.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
  if x.len() != y.len() || x.len() < MIN_CORRELATION_POINTS {
    return 0.0;
  }

  let n = x.len() as f64;
  let sum_x: f64 = x.iter().sum();
  let sum_y: f64 = y.iter().sum();
  let sum_xy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
  let sum_x2: f64 = x.iter().map(|a| a * a).sum();
  let sum_y2: f64 = y.iter().map(|b| b * b).sum();

  let numerator = n * sum_xy - sum_x * sum_y;
  let denominator = ((n * sum_x2 - sum_x * sum_x) * (n * sum_y2 - sum_y * sum_y)).sqrt();
  if denominator == 0.0 || denominator.is_nan() {
    0.0
  } else {
    numerator / denominator
  }
}

/// Mean of the last 3 values against the mean of the ones before
pub fn trend(values: &[f64]) -> Trend {
  if values.len() < MIN_TREND_POINTS {
    return Trend::Stable;
  }

  let (previous, recent) = values.split_at(values.len() - 3);
  let (Some(recent), Some(previous)) = (mean(recent), mean(previous)) else {
    return Trend::Stable;
  };
  if previous == 0.0 {
    return Trend::Stable;
  }

  let change = (recent - previous) / previous * 100.0;
  if change > TREND_THRESHOLD {
    Trend::Improving
  } else if change < -TREND_THRESHOLD {
    Trend::Declining
  } else {
    Trend::Stable
  }
}

fn nonzero(value: Option<i64>) -> Option<i64> {
  value.filter(|v| *v != 0)
}

fn range(values: &[f64]) -> Option<f64> {
  let max = values.iter().copied().reduce(f64::max)?;
  let min = values.iter().copied().reduce(f64::min)?;
  Some(max - min)
}

fn signature(kind: SignatureKind, message: String) -> BiometricSignature {
  BiometricSignature { kind, message }
}

/// First matching pattern over the last 7 rows, else a variance summary.
/// Zero values count as missing.
pub fn biometric_signature(metrics: &[FitnessMetric]) -> BiometricSignature {
  let Some(latest) = metrics.last().filter(|_| metrics.len() >= MIN_SIGNATURE_ROWS) else {
    return signature(
      SignatureKind::InsufficientData,
      "Sync more data to unlock your unique biometric signature pattern analysis.".into(),
    );
  };

  let recent = last_n(metrics, SIGNATURE_DAYS);
  let (paired_rhr, paired_sleep): (Vec<f64>, Vec<f64>) = recent
    .iter()
    .filter_map(|m| Some((nonzero(m.rhr)? as f64, nonzero(m.sleep_score)? as f64)))
    .unzip();
  let hrv_values: Vec<f64> = recent.iter().filter_map(|m| nonzero(m.hrv)).map(|v| v as f64).collect();
  let sleep_values: Vec<f64> = recent
    .iter()
    .filter_map(|m| nonzero(m.sleep_score))
    .map(|v| v as f64)
    .collect();

  let correlation = pearson_correlation(&paired_rhr, &paired_sleep);
  if correlation < -0.5 {
    return signature(
      SignatureKind::SleepRecoveryCoupling,
      format!("Strong sleep-recovery coupling detected (r={:.2})", correlation),
    );
  }

  let latest_rhr = nonzero(latest.rhr);
  let latest_hrv = nonzero(latest.hrv);
  let latest_sleep = nonzero(latest.sleep_score);

  let hrv_trend = trend(&hrv_values);
  if let (Trend::Improving, Some(hrv), [first, .., last]) =
    (hrv_trend, latest_hrv, hrv_values.as_slice())
  {
    if hrv > 60 && *first > 0.0 {
      return signature(
        SignatureKind::ResilienceRising,
        format!(
          "Nervous system resilience trending upward (+{:.1}% in 7d)",
          (last / first - 1.0) * 100.0
        ),
      );
    }
  }

  if let (Some(rhr), Some(sleep)) = (latest_rhr, latest_sleep) {
    if rhr < 55 && sleep > 85 {
      return signature(
        SignatureKind::EliteRecovery,
        format!("Elite recovery zone: RHR {}bpm + sleep {}/100", rhr, sleep),
      );
    }
  }

  if let Some(spread) = range(&sleep_values).filter(|_| sleep_values.len() >= MIN_TREND_POINTS) {
    if spread < 20.0 {
      return signature(
        SignatureKind::CircadianLock,
        format!("Circadian rhythm locked: ±{:.0} variance", spread),
      );
    }
  }

  let latest_recovery = nonzero(latest.recovery_score);
  if let (Some(recovery), Some(hrv), Some(rhr)) = (latest_recovery, latest_hrv, latest_rhr) {
    if recovery > 90 && rhr > 0 && hrv as f64 > rhr as f64 * 0.8 {
      return signature(
        SignatureKind::PeakAdaptation,
        format!(
          "Peak adaptation state: Recovery {}/100, HRV:RHR ratio {:.2}",
          recovery,
          hrv as f64 / rhr as f64
        ),
      );
    }
  }

  let rhr_spread = range(&paired_rhr).map(round_half_up).unwrap_or(0);
  let sleep_steadiness = range(&sleep_values).map(|spread| round_half_up(100.0 - spread)).unwrap_or(0);
  signature(
    SignatureKind::Variance,
    format!(
      "Biometric variance: RHR ±{}bpm, Sleep consistency {}%",
      rhr_spread, sleep_steadiness
    ),
  )
}
