use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: String,
  pub email: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub profile_image_url: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

/// Claims forwarded by the identity provider (without timestamps)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertUser {
  pub id: String,
  pub email: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub profile_image_url: Option<String>,
}
