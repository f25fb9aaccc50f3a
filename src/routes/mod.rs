//! HTTP API
//!
//! Each area exposes a `*Routes` type whose `routes` function returns a
//! router bound to the shared state. `router` merges them and adds tracing
//! and CORS.

mod auth;
mod dashboard;
mod google_fit;
mod insights;
mod metrics;

pub use auth::AuthRoutes;
pub use dashboard::DashboardRoutes;
pub use google_fit::GoogleFitRoutes;
pub use insights::InsightRoutes;
pub use metrics::MetricsRoutes;

use crate::db::AppState;
use crate::google_fit::GoogleFitError;
use crate::models::{UpsertUser, User};
use crate::storage::{self, StorageError};
use axum::{
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  routing::get,
  Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

/// Identity headers set by the upstream identity provider
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_FIRST_NAME_HEADER: &str = "x-user-first-name";
pub const USER_LAST_NAME_HEADER: &str = "x-user-last-name";
pub const USER_PROFILE_IMAGE_HEADER: &str = "x-user-profile-image-url";

/// Build the complete application router
pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(health))
    .merge(AuthRoutes::routes(state.clone()))
    .merge(GoogleFitRoutes::routes(state.clone()))
    .merge(MetricsRoutes::routes(state.clone()))
    .merge(InsightRoutes::routes(state.clone()))
    .merge(DashboardRoutes::routes(state))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
  Json(json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
  }))
}

/// ---------------------------------------------------------------------------
/// Authentication
/// ---------------------------------------------------------------------------

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get(name)
    .and_then(|value| value.to_str().ok())
    .map(str::trim)
    .filter(|value| !value.is_empty())
    .map(str::to_string)
}

/// Resolve the calling user from identity headers and refresh their stored
/// profile. Requests without a subject are rejected.
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<User, ApiError> {
  let id = header_value(headers, USER_ID_HEADER)
    .ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;

  let claims = UpsertUser {
    id,
    email: header_value(headers, USER_EMAIL_HEADER),
    first_name: header_value(headers, USER_FIRST_NAME_HEADER),
    last_name: header_value(headers, USER_LAST_NAME_HEADER),
    profile_image_url: header_value(headers, USER_PROFILE_IMAGE_HEADER),
  };

  Ok(storage::upsert_user(&state.db, &claims).await?)
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

/// Error returned by every handler, rendered as
/// `{success: false, message, errorType}`
#[derive(Debug)]
pub struct ApiError {
  pub status: StatusCode,
  pub error_type: &'static str,
  pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
  success: bool,
  message: &'a str,
  error_type: &'a str,
}

impl ApiError {
  pub fn new(status: StatusCode, error_type: &'static str, message: impl Into<String>) -> Self {
    Self {
      status,
      error_type,
      message: message.into(),
    }
  }

  pub fn unauthorized(message: impl Into<String>) -> Self {
    Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", message)
  }

  pub fn bad_request(message: impl Into<String>) -> Self {
    Self::new(StatusCode::BAD_REQUEST, "ValidationError", message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(StatusCode::NOT_FOUND, "NotFound", message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    if self.status.is_server_error() {
      error!(status = %self.status, error_type = self.error_type, message = %self.message, "Request failed");
    }

    let body = ErrorBody {
      success: false,
      message: &self.message,
      error_type: self.error_type,
    };
    (self.status, Json(body)).into_response()
  }
}

impl From<StorageError> for ApiError {
  fn from(e: StorageError) -> Self {
    Self::new(StatusCode::INTERNAL_SERVER_ERROR, "StorageError", e.to_string())
  }
}

impl From<GoogleFitError> for ApiError {
  fn from(e: GoogleFitError) -> Self {
    let (status, error_type) = match &e {
      GoogleFitError::MissingConfig(_) => (StatusCode::SERVICE_UNAVAILABLE, "ConfigError"),
      GoogleFitError::NotConnected | GoogleFitError::RefreshUnavailable => {
        (StatusCode::BAD_REQUEST, "GoogleFitNotConnected")
      }
      GoogleFitError::OAuth(_) => (StatusCode::BAD_GATEWAY, "OAuthError"),
      GoogleFitError::Request(_) | GoogleFitError::Api(_) => (StatusCode::BAD_GATEWAY, "GoogleFitApiError"),
      GoogleFitError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StorageError"),
    };
    Self::new(status, error_type, e.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Test Helpers
/// ---------------------------------------------------------------------------
