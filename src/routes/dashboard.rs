use super::metrics::DaysQuery;
use super::{authenticate, ApiError};
use crate::dashboard::{build_dashboard, DashboardData};
use crate::db::AppState;
use crate::storage;
use axum::{
  extract::{Query, State},
  http::HeaderMap,
  routing::get,
  Json, Router,
};
use std::sync::Arc;

/// Chart data route
pub struct DashboardRoutes;

impl DashboardRoutes {
  pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
      .route("/api/dashboard", get(Self::handle_dashboard))
      .with_state(state)
  }

  async fn handle_dashboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DaysQuery>,
  ) -> Result<Json<DashboardData>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let metrics = storage::get_fitness_metrics(&state.db, &user.id, query.days()).await?;
    Ok(Json(build_dashboard(&metrics)))
  }
}
