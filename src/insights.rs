//! Daily AI insight generation
//!
//! Summarizes the last week of metrics as plain text, asks the model for
//! three bullets and stores the result. Every failure path degrades to
//! static text so callers always have something to show.

use crate::analysis::{mean, round_half_up};
use crate::db::DbPool;
use crate::llm::{normalize_bullets, LlmClient, LlmConfig};
use crate::models::{FitnessMetric, InsightType, NewInsight};
use crate::storage::{self, StorageError};
use std::fmt::Write;
use tracing::{error, info};

const INSIGHT_WINDOW_DAYS: i64 = 7;
const INSIGHT_MAX_TOKENS: u32 = 200;

pub const GETTING_STARTED_INSIGHT: &str = "• Sync your Google Fit data to get started\n• Receive personalized AI insights daily\n• Track health and performance trends";
pub const DEFAULT_INSIGHT: &str = "• Your biometric data shows consistent patterns\n• Recovery metrics are within normal range\n• Keep monitoring your progress for trends";
pub const UNAVAILABLE_INSIGHT: &str = "• Unable to generate insights at the moment\n• Your data trends look stable overall\n• Try syncing more fitness data";

/// Generate, store and return today's insight for the user.
///
/// Only a failure to read the user's metrics is an error. Without metrics
/// the getting-started text is returned; a model or save failure returns the
/// unavailable text. Neither is stored.
pub async fn generate_daily_insight(
  db: &DbPool,
  llm: &LlmConfig,
  user_id: &str,
) -> Result<String, StorageError> {
  let metrics = storage::get_fitness_metrics(db, user_id, INSIGHT_WINDOW_DAYS).await?;
  if metrics.is_empty() {
    return Ok(GETTING_STARTED_INSIGHT.to_string());
  }

  let summary = build_data_summary(&metrics);

  match request_and_store(db, llm, user_id, &summary).await {
    Ok(content) => Ok(content),
    Err(e) => {
      error!(user_id, error = %e, "Error generating AI insight");
      Ok(UNAVAILABLE_INSIGHT.to_string())
    }
  }
}

#[derive(Debug, thiserror::Error)]
enum InsightError {
  #[error(transparent)]
  Llm(#[from] crate::llm::LlmError),

  #[error(transparent)]
  Storage(#[from] StorageError),
}

async fn request_and_store(
  db: &DbPool,
  llm: &LlmConfig,
  user_id: &str,
  summary: &str,
) -> Result<String, InsightError> {
  let client = LlmClient::new(llm)?;
  let system_prompt = include_str!("prompts/insight_system.txt");
  let user_message = format!(
    "Analyze this week's fitness data and provide exactly 3 bullet points:\n\n{}",
    summary
  );

  let (text, usage) = client
    .complete(system_prompt, &user_message, INSIGHT_MAX_TOKENS)
    .await?;

  let content = match normalize_bullets(&text) {
    text if text.is_empty() => DEFAULT_INSIGHT.to_string(),
    text => text,
  };

  storage::save_insight(
    db,
    &NewInsight {
      user_id: user_id.to_string(),
      content: content.clone(),
      insight_type: InsightType::Daily,
      is_read: false,
    },
  )
  .await?;

  info!(
    user_id,
    prompt_tokens = usage.prompt_tokens,
    completion_tokens = usage.completion_tokens,
    "Daily insight generated"
  );
  Ok(content)
}

/// ---------------------------------------------------------------------------
/// Data Summary
/// ---------------------------------------------------------------------------

/// Plain-text summary of date-ordered metrics: the latest day, changes from
/// the day before and averages over the whole slice.
pub fn build_data_summary(metrics: &[FitnessMetric]) -> String {
  let Some(latest) = metrics.last() else {
    return String::new();
  };
  let previous = metrics.len().checked_sub(2).and_then(|i| metrics.get(i));

  let mut summary = format!("Recent Metrics (last {} days):\n\n", metrics.len());

  // Writing into a String cannot fail
  let _ = writeln!(summary, "Latest Day ({}):", latest.date);
  if let Some(rhr) = latest.rhr {
    let _ = writeln!(summary, "- Resting Heart Rate: {} bpm", rhr);
  }
  if let Some(hrv) = latest.hrv {
    let _ = writeln!(summary, "- HRV: {}", hrv);
  }
  if let Some(sleep) = latest.sleep_score {
    let _ = writeln!(summary, "- Sleep Score: {}/100", sleep);
  }
  if let Some(deep) = latest.deep_sleep_minutes {
    let _ = writeln!(summary, "- Deep Sleep: {} minutes", deep);
  }
  if let Some(steps) = latest.steps {
    let _ = writeln!(summary, "- Steps: {}", format_thousands(steps));
  }
  if let Some(calories) = latest.calories {
    let _ = writeln!(summary, "- Calories: {}", calories);
  }
  if let Some(recovery) = latest.recovery_score {
    let _ = writeln!(summary, "- Recovery Score: {}/100", recovery);
  }

  if let Some(previous) = previous {
    summary.push_str("\nChanges from Previous Day:\n");
    if let (Some(now), Some(before)) = (latest.rhr, previous.rhr) {
      let _ = writeln!(summary, "- RHR: {}{} bpm", sign(now - before), now - before);
    }
    if let (Some(now), Some(before)) = (latest.sleep_score, previous.sleep_score) {
      let _ = writeln!(summary, "- Sleep Score: {}{}", sign(now - before), now - before);
    }
    if let (Some(now), Some(before)) = (latest.steps, previous.steps) {
      let _ = writeln!(summary, "- Steps: {}{}", sign(now - before), format_thousands(now - before));
    }
  }

  summary.push_str("\nWeekly Averages:\n");
  if let Some(avg) = average_of(metrics, |m| m.rhr) {
    let _ = writeln!(summary, "- Avg RHR: {} bpm", round_half_up(avg));
  }
  if let Some(avg) = average_of(metrics, |m| m.sleep_score) {
    let _ = writeln!(summary, "- Avg Sleep Score: {}/100", round_half_up(avg));
  }
  if let Some(avg) = average_of(metrics, |m| m.steps) {
    let _ = writeln!(summary, "- Avg Steps: {}", format_thousands(round_half_up(avg)));
  }

  summary
}

fn sign(diff: i64) -> &'static str {
  if diff > 0 {
    "+"
  } else {
    ""
  }
}

fn average_of(metrics: &[FitnessMetric], field: impl Fn(&FitnessMetric) -> Option<i64>) -> Option<f64> {
  let values: Vec<f64> = metrics.iter().filter_map(&field).map(|v| v as f64).collect();
  mean(&values)
}

/// Format with comma thousands separators: 12345 -> "12,345"
pub fn format_thousands(value: i64) -> String {
  let digits = value.unsigned_abs().to_string();
  let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
  if value < 0 {
    out.push('-');
  }
  for (i, ch) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      out.push(',');
    }
    out.push(ch);
  }
  out
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::*;
  use serde_json::json;

  fn llm_config(server: &mockito::Server) -> LlmConfig {
    LlmConfig {
      api_key: Some("test-key".into()),
      base_url: server.url(),
      model: "gpt-4o-mini".into(),
    }
  }

  async fn seed_week(pool: &DbPool) {
    let mut metrics = Vec::new();
    for day in 1..=3 {
      let mut metric = mock_metric(TEST_USER_ID, date(2024, 3, day), Some(70 + day as i64));
      metric.rhr = Some(60 - day as i64);
      metric.steps = Some(8000 + 1000 * day as i64);
      metrics.push(metric);
    }
    storage::save_fitness_metrics(pool, &metrics).await.unwrap();
  }

  #[test]
  fn test_format_thousands() {
    assert_eq!(format_thousands(0), "0");
    assert_eq!(format_thousands(999), "999");
    assert_eq!(format_thousands(1000), "1,000");
    assert_eq!(format_thousands(12_345), "12,345");
    assert_eq!(format_thousands(1_234_567), "1,234,567");
    assert_eq!(format_thousands(-2500), "-2,500");
  }

  #[test]
  fn test_data_summary_layout() {
    let mut first = mock_stored_metric(TEST_USER_ID, date(2024, 3, 1));
    first.rhr = Some(58);
    first.sleep_score = Some(80);
    first.steps = Some(12_000);

    let mut second = mock_stored_metric(TEST_USER_ID, date(2024, 3, 2));
    second.rhr = Some(61);
    second.hrv = Some(55);
    second.sleep_score = Some(72);
    second.deep_sleep_minutes = Some(85);
    second.steps = Some(9_500);
    second.calories = Some(2300);
    second.recovery_score = Some(84);

    let summary = build_data_summary(&[first, second]);
    let expected = "Recent Metrics (last 2 days):\n\n\
Latest Day (2024-03-02):\n\
- Resting Heart Rate: 61 bpm\n\
- HRV: 55\n\
- Sleep Score: 72/100\n\
- Deep Sleep: 85 minutes\n\
- Steps: 9,500\n\
- Calories: 2300\n\
- Recovery Score: 84/100\n\
\n\
Changes from Previous Day:\n\
- RHR: +3 bpm\n\
- Sleep Score: -8\n\
- Steps: -2,500\n\
\n\
Weekly Averages:\n\
- Avg RHR: 60 bpm\n\
- Avg Sleep Score: 76/100\n\
- Avg Steps: 10,750\n";
    assert_eq!(summary, expected);
  }

  #[test]
  fn test_data_summary_single_day_has_no_changes() {
    let mut only = mock_stored_metric(TEST_USER_ID, date(2024, 3, 1));
    only.steps = Some(4321);
    let summary = build_data_summary(&[only]);
    assert!(summary.starts_with("Recent Metrics (last 1 days):"));
    assert!(!summary.contains("Changes from Previous Day"));
    assert!(summary.contains("- Avg Steps: 4,321"));
    assert!(!summary.contains("Avg RHR"));
    assert_eq!(build_data_summary(&[]), "");
  }

  #[tokio::test]
  async fn test_no_metrics_returns_getting_started_without_saving() {
    let pool = setup_test_db().await;
    seed_test_user(&pool, TEST_USER_ID).await;
    let server = mockito::Server::new_async().await;

    let content = generate_daily_insight(&pool, &llm_config(&server), TEST_USER_ID).await.unwrap();
    assert_eq!(content, GETTING_STARTED_INSIGHT);
    assert!(storage::get_latest_insight(&pool, TEST_USER_ID).await.unwrap().is_none());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_generated_insight_is_saved() {
    let pool = setup_test_db().await;
    seed_test_user(&pool, TEST_USER_ID).await;
    seed_week(&pool).await;

    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/chat/completions")
      .match_body(mockito::Matcher::Regex("Avg Steps: 10,000".into()))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        json!({
          "choices": [{"message": {"role": "assistant", "content": "• Sleep improving • RHR dropping • Steps up"}}]
        })
        .to_string(),
      )
      .create_async()
      .await;

    let content = generate_daily_insight(&pool, &llm_config(&server), TEST_USER_ID).await.unwrap();
    mock.assert_async().await;
    assert_eq!(content, "• Sleep improving\n• RHR dropping\n• Steps up");

    let stored = storage::get_latest_insight(&pool, TEST_USER_ID).await.unwrap().unwrap();
    assert_eq!(stored.content, content);
    assert_eq!(stored.insight_type, "daily");
    assert!(!stored.is_read);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_empty_completion_saves_default_text() {
    let pool = setup_test_db().await;
    seed_test_user(&pool, TEST_USER_ID).await;
    seed_week(&pool).await;

    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/chat/completions")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": ""}}]}"#)
      .create_async()
      .await;

    let content = generate_daily_insight(&pool, &llm_config(&server), TEST_USER_ID).await.unwrap();
    assert_eq!(content, DEFAULT_INSIGHT);
    let stored = storage::get_latest_insight(&pool, TEST_USER_ID).await.unwrap().unwrap();
    assert_eq!(stored.content, DEFAULT_INSIGHT);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_model_failure_returns_unavailable_text() {
    let pool = setup_test_db().await;
    seed_test_user(&pool, TEST_USER_ID).await;
    seed_week(&pool).await;

    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/chat/completions")
      .with_status(500)
      .with_body("upstream exploded")
      .create_async()
      .await;

    let content = generate_daily_insight(&pool, &llm_config(&server), TEST_USER_ID).await.unwrap();
    assert_eq!(content, UNAVAILABLE_INSIGHT);
    assert!(storage::get_latest_insight(&pool, TEST_USER_ID).await.unwrap().is_none());

    // Missing key behaves the same
    let no_key = LlmConfig { api_key: None, ..llm_config(&server) };
    let content = generate_daily_insight(&pool, &no_key, TEST_USER_ID).await.unwrap();
    assert_eq!(content, UNAVAILABLE_INSIGHT);

    teardown_test_db(pool).await;
  }
}
