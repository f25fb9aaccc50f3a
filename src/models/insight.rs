use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
  Daily,
  Weekly,
  Monthly,
}

impl InsightType {
  pub fn as_str(&self) -> &'static str {
    match self {
      InsightType::Daily => "daily",
      InsightType::Weekly => "weekly",
      InsightType::Monthly => "monthly",
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
  pub id: i64,
  pub user_id: String,
  pub content: String,
  #[sqlx(rename = "type")]
  #[serde(rename = "type")]
  pub insight_type: String,
  pub generated_at: Option<DateTime<Utc>>,
  pub is_read: bool,
}

/// For inserting new insights (without id, generated_at)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInsight {
  pub user_id: String,
  pub content: String,
  pub insight_type: InsightType,
  pub is_read: bool,
}
