use super::{authenticate, ApiError};
use crate::db::AppState;
use crate::models::User;
use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};
use std::sync::Arc;

/// Current-user route
pub struct AuthRoutes;

impl AuthRoutes {
  pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
      .route("/api/auth/user", get(Self::handle_get_user))
      .with_state(state)
  }

  async fn handle_get_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
  ) -> Result<Json<User>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    Ok(Json(user))
  }
}
