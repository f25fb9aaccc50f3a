use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Access tokens are treated as expired this long before their real expiry
pub const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GoogleFitToken {
  pub id: i64,
  pub user_id: String,
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub expires_at: DateTime<Utc>,
  pub scope: String,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

impl GoogleFitToken {
  pub fn needs_refresh(&self) -> bool {
    let buffer = Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES);
    Utc::now() + buffer >= self.expires_at
  }
}

/// For inserting new tokens (without id, timestamps)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGoogleFitToken {
  pub user_id: String,
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub expires_at: DateTime<Utc>,
  pub scope: String,
}
