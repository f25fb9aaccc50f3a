use super::{authenticate, ApiError};
use crate::db::AppState;
use crate::insights::generate_daily_insight;
use crate::models::Insight;
use crate::storage;
use axum::{
  extract::{Path, State},
  http::HeaderMap,
  routing::{get, patch, post},
  Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

pub const NO_INSIGHTS_PLACEHOLDER: &str = "No insights yet. Sync your Google Fit data to get started!";

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum LatestInsight {
  Stored(Insight),
  Placeholder { content: &'static str },
}

#[derive(Debug, Serialize)]
struct GeneratedInsight {
  content: String,
}

/// AI insight routes
pub struct InsightRoutes;

impl InsightRoutes {
  pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
      .route("/api/insights/latest", get(Self::handle_latest))
      .route("/api/insights/generate", post(Self::handle_generate))
      .route("/api/insights/:id/read", patch(Self::handle_mark_read))
      .with_state(state)
  }

  async fn handle_latest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
  ) -> Result<Json<LatestInsight>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let latest = match storage::get_latest_insight(&state.db, &user.id).await? {
      Some(insight) => LatestInsight::Stored(insight),
      None => LatestInsight::Placeholder { content: NO_INSIGHTS_PLACEHOLDER },
    };
    Ok(Json(latest))
  }

  async fn handle_generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
  ) -> Result<Json<GeneratedInsight>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let content = generate_daily_insight(&state.db, &state.config.llm, &user.id).await?;
    Ok(Json(GeneratedInsight { content }))
  }

  async fn handle_mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(insight_id): Path<i64>,
  ) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    if !storage::mark_insight_as_read(&state.db, &user.id, insight_id).await? {
      return Err(ApiError::not_found(format!("Insight {} not found", insight_id)));
    }
    Ok(Json(serde_json::json!({ "success": true })))
  }
}
