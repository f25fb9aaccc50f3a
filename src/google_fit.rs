//! Google Fit integration for daily activity, heart-rate and sleep data
//!
//! This module handles Google OAuth, token refresh and the REST calls that
//! produce daily buckets. Turning buckets into scores lives in `analysis`.

use crate::db::DbPool;
use crate::models::NewGoogleFitToken;
use crate::storage::{self, StorageError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::env;
use tracing::{debug, info, warn};

/// ---------------------------------------------------------------------------
/// Configuration Constants
/// ---------------------------------------------------------------------------

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_FIT_API_BASE: &str = "https://www.googleapis.com/fitness/v1";
pub const CALLBACK_PATH: &str = "/api/google-fit/callback";

/// One bucket per calendar day
const BUCKET_DURATION_MILLIS: i64 = 86_400_000;

pub const GOOGLE_FIT_SCOPES: [&str; 5] = [
  "https://www.googleapis.com/auth/fitness.activity.read",
  "https://www.googleapis.com/auth/fitness.heart_rate.read",
  "https://www.googleapis.com/auth/fitness.sleep.read",
  "https://www.googleapis.com/auth/fitness.nutrition.read",
  "https://www.googleapis.com/auth/fitness.body.read",
];

pub const STEP_COUNT_DELTA: &str = "com.google.step_count.delta";
pub const CALORIES_EXPENDED: &str = "com.google.calories.expended";
pub const SLEEP_SEGMENT: &str = "com.google.sleep.segment";
pub const HEART_RATE_BPM: &str = "com.google.heart_rate.bpm";
pub const HEART_RATE_SUMMARY: &str = "com.google.heart_rate.summary";

/// ---------------------------------------------------------------------------
/// OAuth Data Structures
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GoogleFitConfig {
  pub client_id: String,
  pub client_secret: String,
  /// Fixed redirect URI; derived from the request host when unset
  pub redirect_uri: Option<String>,
  pub auth_url: String,
  pub token_url: String,
  pub api_base: String,
}

impl GoogleFitConfig {
  pub fn from_env() -> Result<Self, GoogleFitError> {
    Ok(Self {
      client_id: env::var("GOOGLE_CLIENT_ID")
        .map_err(|_| GoogleFitError::MissingConfig("GOOGLE_CLIENT_ID".into()))?,
      client_secret: env::var("GOOGLE_CLIENT_SECRET")
        .map_err(|_| GoogleFitError::MissingConfig("GOOGLE_CLIENT_SECRET".into()))?,
      redirect_uri: env::var("GOOGLE_REDIRECT_URI").ok(),
      auth_url: env::var("GOOGLE_AUTH_URL").unwrap_or_else(|_| GOOGLE_AUTH_URL.into()),
      token_url: env::var("GOOGLE_TOKEN_URL").unwrap_or_else(|_| GOOGLE_TOKEN_URL.into()),
      api_base: env::var("GOOGLE_FIT_API_BASE").unwrap_or_else(|_| GOOGLE_FIT_API_BASE.into()),
    })
  }

  /// Redirect URI for a request that arrived on `host`
  pub fn redirect_uri_for(&self, host: Option<&str>) -> String {
    match (&self.redirect_uri, host) {
      (Some(uri), _) => uri.clone(),
      (None, Some(host)) => format!("https://{}{}", host, CALLBACK_PATH),
      (None, None) => format!("http://localhost{}", CALLBACK_PATH),
    }
  }
}

/// Response from the Google token endpoint
#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
  pub access_token: String,
  pub expires_in: i64,
  #[serde(default)]
  pub refresh_token: Option<String>,
  #[serde(default)]
  pub scope: Option<String>,
  #[serde(default)]
  pub token_type: Option<String>,
}

/// Token state returned by an exchange or refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleTokens {
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub expires_at: DateTime<Utc>,
  pub scope: String,
}

impl GoogleTokens {
  pub fn from_response(resp: TokenResponse) -> Self {
    Self {
      access_token: resp.access_token,
      refresh_token: resp.refresh_token,
      expires_at: Utc::now() + Duration::seconds(resp.expires_in),
      scope: resp.scope.unwrap_or_else(|| GOOGLE_FIT_SCOPES.join(" ")),
    }
  }

  pub fn into_new_token(self, user_id: &str) -> NewGoogleFitToken {
    NewGoogleFitToken {
      user_id: user_id.to_string(),
      access_token: self.access_token,
      refresh_token: self.refresh_token,
      expires_at: self.expires_at,
      scope: self.scope,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GoogleFitError {
  #[error("Missing configuration: {0}")]
  MissingConfig(String),

  #[error("HTTP request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("OAuth error: {0}")]
  OAuth(String),

  #[error("API error: {0}")]
  Api(String),

  #[error("No Google Fit token found. Please connect your Google Fit account.")]
  NotConnected,

  #[error("Refresh token not available. Please reconnect your Google Fit account.")]
  RefreshUnavailable,

  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// ---------------------------------------------------------------------------
/// OAuth URL Generation
/// ---------------------------------------------------------------------------

/// Build the consent URL. The user id travels in `state` so the callback
/// can attach the tokens to the right account.
pub fn build_auth_url(
  config: &GoogleFitConfig,
  user_id: &str,
  redirect_uri: &str,
) -> Result<String, GoogleFitError> {
  let mut url = url::Url::parse(&config.auth_url).map_err(|e| GoogleFitError::OAuth(e.to_string()))?;

  url
    .query_pairs_mut()
    .append_pair("client_id", &config.client_id)
    .append_pair("redirect_uri", redirect_uri)
    .append_pair("response_type", "code")
    .append_pair("access_type", "offline")
    .append_pair("prompt", "consent")
    .append_pair("scope", &GOOGLE_FIT_SCOPES.join(" "))
    .append_pair("state", user_id);

  Ok(url.to_string())
}

/// ---------------------------------------------------------------------------
/// Google Fit Client
/// ---------------------------------------------------------------------------

pub struct GoogleFitClient {
  client: Client,
  config: GoogleFitConfig,
}

impl GoogleFitClient {
  pub fn new(config: GoogleFitConfig) -> Self {
    Self {
      client: Client::new(),
      config,
    }
  }

  /// Exchange an authorization code for tokens
  pub async fn exchange_code_for_tokens(
    &self,
    code: &str,
    redirect_uri: &str,
  ) -> Result<GoogleTokens, GoogleFitError> {
    let response = self
      .client
      .post(&self.config.token_url)
      .form(&[
        ("client_id", self.config.client_id.as_str()),
        ("client_secret", self.config.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri),
      ])
      .send()
      .await?;

    if !response.status().is_success() {
      let error_text = response.text().await.unwrap_or_default();
      return Err(GoogleFitError::OAuth(format!("Token exchange failed: {}", error_text)));
    }

    let token_response: TokenResponse = response.json().await?;
    Ok(GoogleTokens::from_response(token_response))
  }

  /// Refresh an access token. Google normally omits a new refresh token.
  pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<GoogleTokens, GoogleFitError> {
    let response = self
      .client
      .post(&self.config.token_url)
      .form(&[
        ("client_id", self.config.client_id.as_str()),
        ("client_secret", self.config.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
      ])
      .send()
      .await?;

    if !response.status().is_success() {
      let error_text = response.text().await.unwrap_or_default();
      return Err(GoogleFitError::OAuth(format!("Token refresh failed: {}", error_text)));
    }

    let token_response: TokenResponse = response.json().await?;
    Ok(GoogleTokens::from_response(token_response))
  }

  /// Get a valid access token for the user, refreshing and persisting it if
  /// it is about to expire.
  pub async fn get_valid_access_token(
    &self,
    db: &DbPool,
    user_id: &str,
  ) -> Result<String, GoogleFitError> {
    let token = storage::get_token(db, user_id)
      .await?
      .ok_or(GoogleFitError::NotConnected)?;

    if !token.needs_refresh() {
      return Ok(token.access_token);
    }

    let refresh_token = token.refresh_token.ok_or(GoogleFitError::RefreshUnavailable)?;
    let refreshed = self.refresh_tokens(&refresh_token).await?;

    storage::update_access_token(
      db,
      user_id,
      &refreshed.access_token,
      refreshed.expires_at,
      refreshed.refresh_token.as_deref(),
    )
    .await?;

    info!(user_id, "Google Fit token auto-refreshed");
    Ok(refreshed.access_token)
  }

  /// Fetch daily buckets for `[start_ms, end_ms)`.
  ///
  /// Steps, calories and sleep come from the aggregate endpoint. Heart rate
  /// and sleep from third-party sources (Zepp, Amazfit, ...) never show up
  /// there, so their raw datasets are fetched and spliced into the matching
  /// day buckets. A failure in that second step only loses the extra data.
  pub async fn fetch_fitness_data(
    &self,
    access_token: &str,
    start_ms: i64,
    end_ms: i64,
  ) -> Result<AggregateResponse, GoogleFitError> {
    // Raw datasets are addressed in nanoseconds, so the range must fit i64 nanos
    millis_to_nanos(start_ms)?;
    millis_to_nanos(end_ms)?;

    let mut aggregate = self.fetch_aggregate(access_token, start_ms, end_ms).await?;

    if let Err(e) = self
      .merge_raw_sources(access_token, start_ms, end_ms, &mut aggregate)
      .await
    {
      warn!(error = %e, "Error fetching additional Google Fit data");
    }

    Ok(aggregate)
  }

  async fn fetch_aggregate(
    &self,
    access_token: &str,
    start_ms: i64,
    end_ms: i64,
  ) -> Result<AggregateResponse, GoogleFitError> {
    let request = AggregateRequest {
      aggregate_by: [STEP_COUNT_DELTA, CALORIES_EXPENDED, SLEEP_SEGMENT]
        .iter()
        .map(|name| AggregateBy { data_type_name: name.to_string() })
        .collect(),
      bucket_by_time: BucketByTime { duration_millis: BUCKET_DURATION_MILLIS },
      start_time_millis: start_ms,
      end_time_millis: end_ms,
    };

    let url = format!("{}/users/me/dataset:aggregate", self.config.api_base);
    let response = self
      .client
      .post(&url)
      .bearer_auth(access_token)
      .json(&request)
      .send()
      .await?;

    if !response.status().is_success() {
      let status = response.status();
      let error_text = response.text().await.unwrap_or_default();
      return Err(GoogleFitError::Api(format!(
        "Failed to fetch Google Fit data ({}): {}",
        status, error_text
      )));
    }

    Ok(response.json().await?)
  }

  async fn merge_raw_sources(
    &self,
    access_token: &str,
    start_ms: i64,
    end_ms: i64,
    aggregate: &mut AggregateResponse,
  ) -> Result<(), GoogleFitError> {
    let sources = self.list_data_sources(access_token).await?;

    let heart_rate = sources.iter().find(|s| s.data_type_name() == Some(HEART_RATE_BPM));
    let sleep = sources.iter().find(|s| s.data_type_name() == Some(SLEEP_SEGMENT));

    debug!(
      heart_rate = heart_rate.is_some(),
      sleep = sleep.is_some(),
      "Google Fit data sources found"
    );

    for source in [heart_rate, sleep].into_iter().flatten() {
      let dataset = self
        .fetch_dataset(access_token, &source.data_stream_id, start_ms, end_ms)
        .await?;

      if dataset.point.is_empty() {
        debug!(source = %source.data_stream_id, "No data points in range");
        continue;
      }

      info!(
        source = %source.data_stream_id,
        points = dataset.point.len(),
        "Merging raw data points into buckets"
      );
      merge_points_into_buckets(aggregate, &source.data_stream_id, dataset.point);
    }

    Ok(())
  }

  /// List every data source the user has granted access to
  pub async fn list_data_sources(&self, access_token: &str) -> Result<Vec<DataSource>, GoogleFitError> {
    let url = format!("{}/users/me/dataSources", self.config.api_base);
    let response = self.client.get(&url).bearer_auth(access_token).send().await?;

    if !response.status().is_success() {
      let status = response.status();
      let error_text = response.text().await.unwrap_or_default();
      return Err(GoogleFitError::Api(format!(
        "Data sources API error {}: {}",
        status, error_text
      )));
    }

    let list: DataSourceList = response.json().await?;
    Ok(list.data_source)
  }

  async fn fetch_dataset(
    &self,
    access_token: &str,
    data_stream_id: &str,
    start_ms: i64,
    end_ms: i64,
  ) -> Result<Dataset, GoogleFitError> {
    let mut url = url::Url::parse(&self.config.api_base).map_err(|e| GoogleFitError::Api(e.to_string()))?;
    let dataset_id = format!("{}-{}", millis_to_nanos(start_ms)?, millis_to_nanos(end_ms)?);
    url
      .path_segments_mut()
      .map_err(|_| GoogleFitError::Api("Invalid API base URL".into()))?
      .pop_if_empty()
      .extend(["users", "me", "dataSources", data_stream_id, "datasets", dataset_id.as_str()]);

    let response = self.client.get(url).bearer_auth(access_token).send().await?;

    if !response.status().is_success() {
      let status = response.status();
      let error_text = response.text().await.unwrap_or_default();
      return Err(GoogleFitError::Api(format!(
        "Dataset API error {}: {}",
        status, error_text
      )));
    }

    Ok(response.json().await?)
  }
}

/// Group raw points by the UTC day of their start and append them to the
/// bucket of the same day as an extra dataset.
pub fn merge_points_into_buckets(
  aggregate: &mut AggregateResponse,
  data_source_id: &str,
  points: Vec<DataPoint>,
) {
  let mut by_day: BTreeMap<NaiveDate, Vec<DataPoint>> = BTreeMap::new();
  for point in points {
    if let Some(day) = nanos_to_date(point.start_time_nanos) {
      by_day.entry(day).or_default().push(point);
    }
  }

  for bucket in &mut aggregate.bucket {
    let Some(day) = millis_to_date(bucket.start_time_millis) else { continue };
    if let Some(points) = by_day.remove(&day) {
      bucket.dataset.push(Dataset {
        data_source_id: Some(data_source_id.to_string()),
        data_type: None,
        point: points,
      });
    }
  }
}

pub fn millis_to_date(millis: i64) -> Option<NaiveDate> {
  DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

pub fn millis_to_nanos(millis: i64) -> Result<i64, GoogleFitError> {
  millis
    .checked_mul(1_000_000)
    .ok_or_else(|| GoogleFitError::Api(format!("Timestamp {} ms is out of range", millis)))
}

pub fn nanos_to_date(nanos: i64) -> Option<NaiveDate> {
  millis_to_date(nanos / 1_000_000)
}

/// Millisecond timestamp of UTC midnight at the start of `date`
pub fn date_to_millis(date: NaiveDate) -> i64 {
  date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis()).unwrap_or_default()
}

/// ---------------------------------------------------------------------------
/// Google Fit API Data Structures
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateRequest {
  aggregate_by: Vec<AggregateBy>,
  bucket_by_time: BucketByTime,
  #[serde(with = "int64_string")]
  start_time_millis: i64,
  #[serde(with = "int64_string")]
  end_time_millis: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateBy {
  data_type_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BucketByTime {
  #[serde(with = "int64_string")]
  duration_millis: i64,
}

/// Aggregate response: one bucket per day
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateResponse {
  #[serde(default)]
  pub bucket: Vec<Bucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
  #[serde(with = "int64_string")]
  pub start_time_millis: i64,
  #[serde(with = "int64_string")]
  pub end_time_millis: i64,
  #[serde(default)]
  pub dataset: Vec<Dataset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
  #[serde(default)]
  pub data_source_id: Option<String>,
  #[serde(default)]
  pub data_type: Option<DataType>,
  #[serde(default)]
  pub point: Vec<DataPoint>,
}

impl Dataset {
  /// Data type of the dataset: its explicit type name, else the type
  /// embedded in the source id (`derived:<type>:<app>:...`).
  pub fn data_type_name(&self) -> Option<&str> {
    if let Some(data_type) = &self.data_type {
      return Some(data_type.name.as_str());
    }
    let source = self.data_source_id.as_deref()?;
    let mut parts = source.split(':');
    let first = parts.next()?;
    Some(parts.next().unwrap_or(first))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataType {
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
  #[serde(with = "int64_string")]
  pub start_time_nanos: i64,
  #[serde(with = "int64_string")]
  pub end_time_nanos: i64,
  #[serde(default)]
  pub data_type_name: Option<String>,
  #[serde(default)]
  pub value: Vec<PointValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointValue {
  #[serde(default)]
  pub int_val: Option<i64>,
  #[serde(default)]
  pub fp_val: Option<f64>,
  #[serde(default)]
  pub map_val: Vec<MapValEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapValEntry {
  pub key: String,
  pub value: PointValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSourceList {
  #[serde(default)]
  data_source: Vec<DataSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
  pub data_stream_id: String,
  #[serde(default)]
  pub data_type: Option<DataType>,
  #[serde(default)]
  pub device: Option<Device>,
  #[serde(default)]
  pub application: Option<Application>,
}

impl DataSource {
  pub fn data_type_name(&self) -> Option<&str> {
    self.data_type.as_ref().map(|t| t.name.as_str())
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
  #[serde(default)]
  pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
  #[serde(default)]
  pub name: Option<String>,
}

/// Google encodes int64 fields as JSON strings; accept both forms.
mod int64_string {
  use super::*;

  #[derive(Deserialize)]
  #[serde(untagged)]
  enum StringOrInt {
    Int(i64),
    Str(String),
  }

  pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match StringOrInt::deserialize(deserializer)? {
      StringOrInt::Int(v) => Ok(v),
      StringOrInt::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::*;
  use serde_json::json;

  fn config_for(server: &mockito::Server) -> GoogleFitConfig {
    GoogleFitConfig {
      client_id: "client-id".into(),
      client_secret: "client-secret".into(),
      redirect_uri: None,
      auth_url: GOOGLE_AUTH_URL.into(),
      token_url: format!("{}/token", server.url()),
      api_base: server.url(),
    }
  }

  #[test]
  fn test_auth_url_carries_user_state_and_offline_access() {
    let config = GoogleFitConfig {
      client_id: "client-id".into(),
      client_secret: "secret".into(),
      redirect_uri: None,
      auth_url: GOOGLE_AUTH_URL.into(),
      token_url: GOOGLE_TOKEN_URL.into(),
      api_base: GOOGLE_FIT_API_BASE.into(),
    };
    let url = build_auth_url(&config, "user-42", "https://fit.example.com/api/google-fit/callback").unwrap();
    let parsed = url::Url::parse(&url).unwrap();
    let pairs: BTreeMap<String, String> = parsed.query_pairs().into_owned().collect();

    assert_eq!(pairs["state"], "user-42");
    assert_eq!(pairs["access_type"], "offline");
    assert_eq!(pairs["prompt"], "consent");
    assert_eq!(pairs["scope"].split(' ').count(), 5);
    assert!(pairs["scope"].contains("fitness.sleep.read"));
  }

  #[test]
  fn test_redirect_uri_prefers_configured_value() {
    let mut config = GoogleFitConfig {
      client_id: "id".into(),
      client_secret: "secret".into(),
      redirect_uri: None,
      auth_url: GOOGLE_AUTH_URL.into(),
      token_url: GOOGLE_TOKEN_URL.into(),
      api_base: GOOGLE_FIT_API_BASE.into(),
    };
    assert_eq!(
      config.redirect_uri_for(Some("fit.example.com")),
      "https://fit.example.com/api/google-fit/callback"
    );
    config.redirect_uri = Some("http://localhost:5000/cb".into());
    assert_eq!(config.redirect_uri_for(Some("fit.example.com")), "http://localhost:5000/cb");
  }

  #[test]
  fn test_dataset_type_name_resolution() {
    let explicit = Dataset {
      data_type: Some(DataType { name: HEART_RATE_SUMMARY.into() }),
      data_source_id: Some("derived:com.google.step_count.delta:x".into()),
      point: vec![],
    };
    assert_eq!(explicit.data_type_name(), Some(HEART_RATE_SUMMARY));

    let from_source = Dataset {
      data_source_id: Some("derived:com.google.step_count.delta:com.google.android.gms:merged".into()),
      ..Default::default()
    };
    assert_eq!(from_source.data_type_name(), Some(STEP_COUNT_DELTA));

    let bare = Dataset {
      data_source_id: Some("com.google.sleep.segment".into()),
      ..Default::default()
    };
    assert_eq!(bare.data_type_name(), Some(SLEEP_SEGMENT));
  }

  #[test]
  fn test_int64_fields_accept_strings_and_numbers() {
    let bucket: Bucket = serde_json::from_value(json!({
      "startTimeMillis": "1709251200000",
      "endTimeMillis": 1709337600000i64
    }))
    .unwrap();
    assert_eq!(bucket.start_time_millis, 1_709_251_200_000);
    assert_eq!(bucket.end_time_millis, 1_709_337_600_000);
    assert!(bucket.dataset.is_empty());
  }

  #[test]
  fn test_merge_points_groups_by_utc_day() {
    let day1 = date_to_millis(date(2024, 3, 1));
    let day2 = date_to_millis(date(2024, 3, 2));
    let mut aggregate = AggregateResponse {
      bucket: vec![
        Bucket { start_time_millis: day1, end_time_millis: day2, dataset: vec![] },
        Bucket { start_time_millis: day2, end_time_millis: day2 + BUCKET_DURATION_MILLIS, dataset: vec![] },
      ],
    };

    let points = vec![
      hr_point(day1 + 3_600_000, 62.0),
      hr_point(day1 + 7_200_000, 58.0),
      hr_point(day2 + 3_600_000, 65.0),
      // No bucket for this day: dropped
      hr_point(day2 + 2 * BUCKET_DURATION_MILLIS, 70.0),
    ];
    merge_points_into_buckets(&mut aggregate, "raw:com.google.heart_rate.bpm:zepp", points);

    assert_eq!(aggregate.bucket[0].dataset.len(), 1);
    assert_eq!(aggregate.bucket[0].dataset[0].point.len(), 2);
    assert_eq!(aggregate.bucket[0].dataset[0].data_type_name(), Some(HEART_RATE_BPM));
    assert_eq!(aggregate.bucket[1].dataset[0].point.len(), 1);
  }

  #[tokio::test]
  async fn test_exchange_code_for_tokens() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/token")
      .match_body(mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        json!({
          "access_token": "access",
          "refresh_token": "refresh",
          "expires_in": 3599,
          "scope": "https://www.googleapis.com/auth/fitness.activity.read",
          "token_type": "Bearer"
        })
        .to_string(),
      )
      .create_async()
      .await;

    let client = GoogleFitClient::new(config_for(&server));
    let tokens = client.exchange_code_for_tokens("code", "http://localhost/cb").await.unwrap();

    mock.assert_async().await;
    assert_eq!(tokens.access_token, "access");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh"));
    assert!(tokens.expires_at > Utc::now());
  }

  #[tokio::test]
  async fn test_exchange_failure_is_oauth_error() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/token")
      .with_status(400)
      .with_body(r#"{"error":"invalid_grant"}"#)
      .create_async()
      .await;

    let client = GoogleFitClient::new(config_for(&server));
    let result = client.exchange_code_for_tokens("bad", "http://localhost/cb").await;
    assert!(matches!(result, Err(GoogleFitError::OAuth(msg)) if msg.contains("invalid_grant")));
  }

  #[tokio::test]
  async fn test_valid_token_returned_without_refresh() {
    let pool = setup_test_db().await;
    seed_test_user(&pool, TEST_USER_ID).await;
    storage::save_token(&pool, &mock_token(TEST_USER_ID, Utc::now() + Duration::hours(1)))
      .await
      .unwrap();

    // No mocks registered: any HTTP call would fail the test
    let server = mockito::Server::new_async().await;
    let client = GoogleFitClient::new(config_for(&server));
    let token = client.get_valid_access_token(&pool, TEST_USER_ID).await.unwrap();
    assert_eq!(token, "access-token");

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_expired_token_is_refreshed_and_persisted() {
    let pool = setup_test_db().await;
    seed_test_user(&pool, TEST_USER_ID).await;
    storage::save_token(&pool, &mock_token(TEST_USER_ID, Utc::now() - Duration::minutes(1)))
      .await
      .unwrap();

    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/token")
      .match_body(mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(json!({"access_token": "fresh", "expires_in": 3600}).to_string())
      .create_async()
      .await;

    let client = GoogleFitClient::new(config_for(&server));
    let token = client.get_valid_access_token(&pool, TEST_USER_ID).await.unwrap();
    mock.assert_async().await;
    assert_eq!(token, "fresh");

    let stored = storage::get_token(&pool, TEST_USER_ID).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "fresh");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-token"));
    assert!(!stored.needs_refresh());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_missing_token_and_missing_refresh_token() {
    let pool = setup_test_db().await;
    seed_test_user(&pool, TEST_USER_ID).await;
    let server = mockito::Server::new_async().await;
    let client = GoogleFitClient::new(config_for(&server));

    let result = client.get_valid_access_token(&pool, TEST_USER_ID).await;
    assert!(matches!(result, Err(GoogleFitError::NotConnected)));

    let mut token = mock_token(TEST_USER_ID, Utc::now() - Duration::hours(1));
    token.refresh_token = None;
    storage::save_token(&pool, &token).await.unwrap();
    let result = client.get_valid_access_token(&pool, TEST_USER_ID).await;
    assert!(matches!(result, Err(GoogleFitError::RefreshUnavailable)));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_fetch_fitness_data_merges_heart_rate_source() {
    let mut server = mockito::Server::new_async().await;
    let start = date_to_millis(date(2024, 3, 1));
    let end = start + BUCKET_DURATION_MILLIS;

    let aggregate = server
      .mock("POST", "/users/me/dataset:aggregate")
      .match_header("authorization", "Bearer token")
      .match_body(mockito::Matcher::PartialJson(json!({
        "bucketByTime": {"durationMillis": "86400000"},
        "startTimeMillis": start.to_string()
      })))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        json!({
          "bucket": [{
            "startTimeMillis": start.to_string(),
            "endTimeMillis": end.to_string(),
            "dataset": [{
              "dataSourceId": "derived:com.google.step_count.delta:com.google.android.gms:aggregated",
              "point": [{
                "startTimeNanos": (start * 1_000_000).to_string(),
                "endTimeNanos": (end * 1_000_000).to_string(),
                "value": [{"intVal": 8000}]
              }]
            }]
          }]
        })
        .to_string(),
      )
      .create_async()
      .await;

    server
      .mock("GET", "/users/me/dataSources")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        json!({
          "dataSource": [{
            "dataStreamId": "raw:com.google.heart_rate.bpm:com.huami.watch",
            "dataType": {"name": "com.google.heart_rate.bpm"}
          }]
        })
        .to_string(),
      )
      .create_async()
      .await;

    let dataset_path = format!(
      "/users/me/dataSources/raw:com.google.heart_rate.bpm:com.huami.watch/datasets/{}-{}",
      start * 1_000_000,
      end * 1_000_000
    );
    server
      .mock("GET", dataset_path.as_str())
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        json!({
          "dataSourceId": "raw:com.google.heart_rate.bpm:com.huami.watch",
          "point": [{
            "startTimeNanos": ((start + 60_000) * 1_000_000).to_string(),
            "endTimeNanos": ((start + 60_000) * 1_000_000).to_string(),
            "value": [{"fpVal": 57.0}]
          }]
        })
        .to_string(),
      )
      .create_async()
      .await;

    let client = GoogleFitClient::new(config_for(&server));
    let data = client.fetch_fitness_data("token", start, end).await.unwrap();

    aggregate.assert_async().await;
    assert_eq!(data.bucket.len(), 1);
    assert_eq!(data.bucket[0].dataset.len(), 2);
    assert_eq!(data.bucket[0].dataset[1].data_type_name(), Some(HEART_RATE_BPM));
  }

  #[tokio::test]
  async fn test_data_source_failure_keeps_aggregate() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/users/me/dataset:aggregate")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"bucket": []}"#)
      .create_async()
      .await;
    server
      .mock("GET", "/users/me/dataSources")
      .with_status(403)
      .with_body("forbidden")
      .create_async()
      .await;

    let client = GoogleFitClient::new(config_for(&server));
    let data = client.fetch_fitness_data("token", 0, BUCKET_DURATION_MILLIS).await.unwrap();
    assert!(data.bucket.is_empty());
  }

  #[tokio::test]
  async fn test_aggregate_failure_is_error() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/users/me/dataset:aggregate")
      .with_status(500)
      .with_body("boom")
      .create_async()
      .await;

    let client = GoogleFitClient::new(config_for(&server));
    let result = client.fetch_fitness_data("token", 0, BUCKET_DURATION_MILLIS).await;
    assert!(matches!(result, Err(GoogleFitError::Api(_))));
  }

  #[tokio::test]
  async fn test_out_of_range_dates_fail_before_any_request() {
    let mut server = mockito::Server::new_async().await;
    let aggregate = server
      .mock("POST", "/users/me/dataset:aggregate")
      .expect(0)
      .create_async()
      .await;

    let start = date_to_millis(NaiveDate::from_ymd_opt(2263, 1, 1).unwrap());
    let client = GoogleFitClient::new(config_for(&server));
    let result = client
      .fetch_fitness_data("token", start, start + BUCKET_DURATION_MILLIS)
      .await;

    assert!(matches!(result, Err(GoogleFitError::Api(_))));
    aggregate.assert_async().await;
  }

  #[test]
  fn test_millis_to_nanos_bounds() {
    assert_eq!(millis_to_nanos(1_500).unwrap(), 1_500_000_000);
    assert!(millis_to_nanos(i64::MAX / 1_000).is_err());
  }
}
