// HTTP request handlers
use crate::application::history_service::QueryError;
use crate::application::sample_repository::PersistenceError;
use crate::domain::sample::{AveragedSample, PowerSummary};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub start_offset_hours: Option<String>,
    pub end_offset_hours: Option<String>,
}

/// Listing row with the derived power figure
#[derive(Debug, Serialize, PartialEq)]
pub struct SampleView {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub current: f64,
    pub voltage: f64,
    pub power: f64,
}

impl From<AveragedSample> for SampleView {
    fn from(sample: AveragedSample) -> Self {
        Self {
            power: sample.power(),
            id: sample.id,
            timestamp: sample.timestamp,
            current: sample.current,
            voltage: sample.voltage,
        }
    }
}

/// Window aggregate; the averages are omitted when the window is empty.
#[derive(Debug, Serialize, PartialEq)]
pub struct SummaryView {
    pub samples: usize,
    #[serde(flatten)]
    pub averages: Option<PowerSummary>,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "sample not found".to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage is unavailable".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        tracing::error!(error = %err, "storage call failed");
        ApiError::Unavailable
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Invalid(err) => ApiError::BadRequest(err.to_string()),
            QueryError::Storage(_) => ApiError::Unavailable,
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// All persisted samples, oldest first
pub async fn list_samples(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SampleView>>, ApiError> {
    let samples = state.history.list_samples().await?;
    Ok(Json(samples.into_iter().map(SampleView::from).collect()))
}

pub async fn get_sample(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SampleView>, ApiError> {
    match state.history.sample(id).await? {
        Some(sample) => Ok(Json(sample.into())),
        None => Err(ApiError::NotFound),
    }
}

pub async fn delete_sample(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SampleView>, ApiError> {
    match state.history.delete_sample(id).await? {
        Some(sample) => Ok(Json(sample.into())),
        None => Err(ApiError::NotFound),
    }
}

pub async fn samples_in_range(
    Query(params): Query<RangeParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SampleView>>, ApiError> {
    let start = params.start_offset_hours.map(Value::String).unwrap_or(Value::Null);
    let end = params.end_offset_hours.map(Value::String).unwrap_or(Value::Null);

    let samples = state.history.query_range(&start, &end).await?;
    Ok(Json(samples.into_iter().map(SampleView::from).collect()))
}

pub async fn range_summary(
    Query(params): Query<RangeParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SummaryView>, ApiError> {
    let start = params.start_offset_hours.map(Value::String).unwrap_or(Value::Null);
    let end = params.end_offset_hours.map(Value::String).unwrap_or(Value::Null);

    let samples = state.history.query_range(&start, &end).await?;
    Ok(Json(SummaryView {
        samples: samples.len(),
        averages: PowerSummary::of(&samples),
    }))
}
