pub mod analyzer;
pub mod config;
pub mod credentials;
pub mod error;
pub mod github;
pub mod metrics;
pub mod pagination;
pub mod pulls;
pub mod rate_limit;
pub mod store;
pub mod teams;
pub mod types;

use analyzer::{DownloadReport, PrAnalyzer};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use config::{AppConfig, RepoId};
use error::AnalyticsError;
use metrics::{ChangesVsHours, HistogramBucket, HistogramOptions, MergeSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Histogram payload handed to the plotting front end.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistogramResponse {
    pub repository: RepoId,
    pub team: Option<String>,
    pub buckets: Vec<HistogramBucket>,
}

#[derive(Debug, Deserialize)]
pub struct HistogramQuery {
    pub bucket_width: Option<f64>,
    pub max_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct VerbsQuery {
    #[serde(default = "default_verb_count")]
    pub n: usize,
}

fn default_verb_count() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct MaxHoursQuery {
    pub max_hours: Option<f64>,
}

type ApiError = (StatusCode, String);

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Download and analysis service for the configured repository.
    pub analyzer: PrAnalyzer,
    /// Cancelled on shutdown; aborts in-flight downloads before their next request.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Initializes the application state, resolving the GitHub token from
    /// `token` or the environment.
    pub fn new(config: &AppConfig, token: Option<String>) -> anyhow::Result<Self> {
        let analyzer = PrAnalyzer::new(config, token)?;
        Ok(Self {
            analyzer,
            shutdown: CancellationToken::new(),
        })
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/download", post(download))
        .route("/api/histogram", get(get_histogram))
        .route("/api/summary", get(get_summary))
        .route("/api/authors", get(get_hours_by_author))
        .route("/api/verbs", get(get_title_verbs))
        .route("/api/changes", get(get_changes_by_author))
        .route("/api/changes_vs_hours", get(get_changes_vs_hours))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_error(e: AnalyticsError) -> ApiError {
    let status = e.status_code();
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    } else {
        tracing::warn!("Request rejected: {}", e);
    }
    (status, e.to_string())
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "pr-analytics",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn download(State(state): State<Arc<AppState>>) -> Result<Json<DownloadReport>, ApiError> {
    state
        .analyzer
        .download(state.shutdown.child_token())
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn get_histogram(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistogramQuery>,
) -> Result<Json<HistogramResponse>, ApiError> {
    let defaults = state.analyzer.config().histogram_options();
    let options = HistogramOptions {
        bucket_width_hours: query.bucket_width.unwrap_or(defaults.bucket_width_hours),
        max_hours: query.max_hours.or(defaults.max_hours),
    };

    let buckets = state
        .analyzer
        .hours_to_merge_histogram(&options)
        .await
        .map_err(api_error)?;

    tracing::debug!(repo = %state.analyzer.repository(), buckets = buckets.len(), "Returning histogram");

    Ok(Json(HistogramResponse {
        repository: state.analyzer.repository().clone(),
        team: state.analyzer.config().team.clone(),
        buckets,
    }))
}

pub async fn get_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MergeSummary>, ApiError> {
    state.analyzer.summary().await.map(Json).map_err(api_error)
}

pub async fn get_hours_by_author(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MaxHoursQuery>,
) -> Result<Json<BTreeMap<String, Vec<f64>>>, ApiError> {
    let max_hours = query.max_hours.or(state.analyzer.config().max_hours);
    state
        .analyzer
        .hours_to_merge_by_author(max_hours)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn get_title_verbs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerbsQuery>,
) -> Result<Json<Vec<(String, usize)>>, ApiError> {
    state
        .analyzer
        .title_verbs(query.n)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn get_changes_by_author(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, u64>>, ApiError> {
    state
        .analyzer
        .changes_by_author()
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn get_changes_vs_hours(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MaxHoursQuery>,
) -> Result<Json<Vec<ChangesVsHours>>, ApiError> {
    let max_hours = query.max_hours.or(state.analyzer.config().max_hours);
    state
        .analyzer
        .changes_vs_hours_to_merge(max_hours)
        .await
        .map(Json)
        .map_err(api_error)
}
