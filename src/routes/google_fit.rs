use super::{authenticate, ApiError};
use crate::analysis::transform_fitness_data;
use crate::db::AppState;
use crate::google_fit::{
  build_auth_url, date_to_millis, millis_to_nanos, GoogleFitClient, GoogleFitConfig, GoogleFitError,
  CALLBACK_PATH,
};
use crate::insights::generate_daily_insight;
use crate::models::UpsertUser;
use crate::storage;
use axum::{
  body::Bytes,
  extract::{Query, State},
  http::{header::HOST, HeaderMap, StatusCode},
  response::{IntoResponse, Redirect, Response},
  routing::{delete, get, post},
  Json, Router,
};
use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Days synced when the request names no start date
const DEFAULT_SYNC_DAYS: i64 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
  auth_url: String,
  redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
  code: Option<String>,
  state: Option<String>,
  error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
  connected: bool,
  expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
  start_date: Option<NaiveDate>,
  end_date: Option<NaiveDate>,
}

impl SyncRequest {
  /// An absent or blank body means the default range
  fn parse(body: &[u8]) -> Result<Self, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
      return Ok(Self::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid sync request: {}", e)))
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
  success: bool,
  synced: usize,
  message: String,
  details: SyncDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncDetails {
  start_date: NaiveDate,
  end_date: NaiveDate,
  metrics_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataSourcesResponse {
  message: &'static str,
  data_sources: Vec<DataSourceSummary>,
  total_sources: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataSourceSummary {
  data_stream_id: String,
  data_type: Option<String>,
  device: String,
  application: String,
}

/// Redirect URI diagnostics for setting up the OAuth client
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugResponse {
  message: &'static str,
  request_host: Option<String>,
  /// The URI `connect` sends to Google; it must be registered on the OAuth client
  redirect_uri: String,
  configured_redirect_uri: Option<String>,
  google_configured: bool,
  disabled_reason: Option<String>,
}

/// Google Fit connection and sync routes
pub struct GoogleFitRoutes;

impl GoogleFitRoutes {
  pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
      .route("/api/google-fit/connect", get(Self::handle_connect))
      .route("/api/google-fit/callback", get(Self::handle_callback))
      .route("/api/google-fit/status", get(Self::handle_status))
      .route("/api/google-fit/disconnect", delete(Self::handle_disconnect))
      .route("/api/google-fit/sync", post(Self::handle_sync))
      .route("/api/google-fit/datasources", get(Self::handle_data_sources))
      .route("/api/google-fit/debug", get(Self::handle_debug))
      .with_state(state)
  }

  fn google_config(state: &AppState) -> Result<&GoogleFitConfig, ApiError> {
    state
      .config
      .google
      .as_ref()
      .ok_or_else(|| GoogleFitError::MissingConfig("GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET".into()).into())
  }

  fn redirect_uri(config: &GoogleFitConfig, headers: &HeaderMap) -> String {
    let host = headers.get(HOST).and_then(|h| h.to_str().ok());
    config.redirect_uri_for(host)
  }

  async fn handle_connect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
  ) -> Result<Json<ConnectResponse>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let config = Self::google_config(&state)?;

    let redirect_uri = Self::redirect_uri(config, &headers);
    let auth_url = build_auth_url(config, &user.id, &redirect_uri)?;
    info!(user_id = %user.id, %redirect_uri, "Starting Google Fit connection");

    Ok(Json(ConnectResponse { auth_url, redirect_uri }))
  }

  /// OAuth redirect target. Unauthenticated: the user id comes back in `state`.
  async fn handle_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
  ) -> Response {
    if let Some(oauth_error) = params.error {
      warn!(error = %oauth_error, "Google Fit authorization denied");
      let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("error", &oauth_error)
        .finish();
      return Redirect::to(&format!("/?{}", query)).into_response();
    }

    let (Some(code), Some(user_id)) = (params.code, params.state) else {
      warn!("Google Fit callback missing code or state");
      return (StatusCode::BAD_REQUEST, "Missing code or state parameter").into_response();
    };

    match Self::complete_connection(&state, &headers, &code, &user_id).await {
      Ok(()) => {
        info!(%user_id, "Google Fit connected");
        Redirect::to("/?connected=true").into_response()
      }
      Err(e) => {
        error!(%user_id, error = %e, "Error in Google Fit callback");
        Redirect::to("/?error=connection_failed").into_response()
      }
    }
  }

  async fn complete_connection(
    state: &AppState,
    headers: &HeaderMap,
    code: &str,
    user_id: &str,
  ) -> Result<(), GoogleFitError> {
    let config = state
      .config
      .google
      .clone()
      .ok_or_else(|| GoogleFitError::MissingConfig("GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET".into()))?;
    let redirect_uri = Self::redirect_uri(&config, headers);

    let client = GoogleFitClient::new(config);
    let tokens = client.exchange_code_for_tokens(code, &redirect_uri).await?;

    // The token row references the user; make sure it exists
    storage::upsert_user(
      &state.db,
      &UpsertUser {
        id: user_id.to_string(),
        ..Default::default()
      },
    )
    .await?;
    storage::save_token(&state.db, &tokens.into_new_token(user_id)).await?;
    Ok(())
  }

  async fn handle_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
  ) -> Result<Json<StatusResponse>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let token = storage::get_token(&state.db, &user.id).await?;

    Ok(Json(StatusResponse {
      connected: token.is_some(),
      expires_at: token.map(|t| t.expires_at),
    }))
  }

  async fn handle_disconnect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
  ) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    storage::delete_token(&state.db, &user.id).await?;
    info!(user_id = %user.id, "Google Fit disconnected");
    Ok(Json(serde_json::json!({ "success": true })))
  }

  async fn handle_sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
  ) -> Result<Json<SyncResponse>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let config = Self::google_config(&state)?.clone();
    let request = SyncRequest::parse(&body)?;

    let today = Utc::now().date_naive();
    let end = request.end_date.unwrap_or(today);
    let start = request
      .start_date
      .unwrap_or_else(|| today - Duration::days(DEFAULT_SYNC_DAYS));
    if start > end {
      return Err(ApiError::bad_request("startDate must not be after endDate"));
    }

    // The end date is inclusive: fetch up to midnight after it
    let start_ms = date_to_millis(start);
    let end_ms = end
      .checked_add_days(Days::new(1))
      .map(date_to_millis)
      .filter(|ms| millis_to_nanos(*ms).is_ok() && millis_to_nanos(start_ms).is_ok())
      .ok_or_else(|| ApiError::bad_request("Sync range is outside the supported dates"))?;

    info!(user_id = %user.id, %start, %end, "Starting Google Fit sync");

    let client = GoogleFitClient::new(config);
    let access_token = client.get_valid_access_token(&state.db, &user.id).await?;
    let data = client.fetch_fitness_data(&access_token, start_ms, end_ms).await?;

    let metrics = transform_fitness_data(&data, &user.id);
    let synced = storage::save_fitness_metrics(&state.db, &metrics).await?;
    info!(user_id = %user.id, synced, "Saved Google Fit metrics");

    // Insight generation never fails the sync
    if let Err(e) = generate_daily_insight(&state.db, &state.config.llm, &user.id).await {
      error!(user_id = %user.id, error = %e, "Failed to generate AI insight after sync");
    }

    Ok(Json(SyncResponse {
      success: true,
      synced,
      message: format!("Successfully synced {} days of fitness data", synced),
      details: SyncDetails {
        start_date: start,
        end_date: end,
        metrics_count: synced,
      },
    }))
  }

  async fn handle_data_sources(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
  ) -> Result<Json<DataSourcesResponse>, ApiError> {
    let user = authenticate(&headers, &state).await?;
    let client = GoogleFitClient::new(Self::google_config(&state)?.clone());
    let access_token = client.get_valid_access_token(&state.db, &user.id).await?;

    let sources = client.list_data_sources(&access_token).await?;
    let data_sources: Vec<DataSourceSummary> = sources
      .into_iter()
      .map(|source| DataSourceSummary {
        data_type: source.data_type_name().map(str::to_string),
        device: source
          .device
          .and_then(|d| d.model)
          .unwrap_or_else(|| "Unknown".into()),
        application: source
          .application
          .and_then(|a| a.name)
          .unwrap_or_else(|| "Unknown".into()),
        data_stream_id: source.data_stream_id,
      })
      .collect();

    Ok(Json(DataSourcesResponse {
      message: "Available Google Fit Data Sources",
      total_sources: data_sources.len(),
      data_sources,
    }))
  }

  async fn handle_debug(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
  ) -> Result<Json<DebugResponse>, ApiError> {
    authenticate(&headers, &state).await?;
    let host = headers.get(HOST).and_then(|h| h.to_str().ok());
    let google = state.config.google.as_ref();

    let redirect_uri = match google {
      Some(config) => config.redirect_uri_for(host),
      None => format!("https://{}{}", host.unwrap_or("localhost"), CALLBACK_PATH),
    };

    Ok(Json(DebugResponse {
      message: "Google OAuth Debug Information",
      request_host: host.map(str::to_string),
      redirect_uri,
      configured_redirect_uri: google.and_then(|c| c.redirect_uri.clone()),
      google_configured: google.is_some(),
      disabled_reason: state.config.google_disabled_reason.clone(),
    }))
  }
}
