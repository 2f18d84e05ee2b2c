use crate::ingest::IngestError;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metron_common::types::{MetricKind, MetricName, MetricSample, ValidationError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Envelope for every JSON response. `err_code` is 0 on success.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn success_response<T: Serialize>(status: StatusCode, trace_id: &str, data: T) -> Response {
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "empty_batch" => 1104,
        "internal_error" => 1500,
        "storage_error" => 1501,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            err_code: error_code(code),
            err_msg: msg.into(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// A handler failure, rendered through [`error_response`].
#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    code: &'static str,
    msg: String,
}

impl ApiFailure {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            msg: msg.into(),
        }
    }

    fn render(self, trace_id: &str) -> Response {
        error_response(self.status, trace_id, self.code, self.msg)
    }
}

impl From<ValidationError> for ApiFailure {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::EmptyBatch => Self {
                status: StatusCode::BAD_REQUEST,
                code: "empty_batch",
                msg: e.to_string(),
            },
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<IngestError> for ApiFailure {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Invalid(v) => v.into(),
            IngestError::Storage(s) if s.is_not_found() => Self {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                msg: s.to_string(),
            },
            IngestError::Storage(s) => {
                tracing::error!(error = %s, "Storage failure");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "storage_error",
                    msg: s.to_string(),
                }
            }
        }
    }
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiFailure> {
    serde_json::from_slice(body).map_err(|e| ApiFailure::bad_request(format!("invalid JSON body: {e}")))
}

fn respond<T: Serialize>(trace_id: &str, result: Result<T, ApiFailure>) -> Response {
    match result {
        Ok(data) => success_response(StatusCode::OK, trace_id, data),
        Err(failure) => failure.render(trace_id),
    }
}

#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    /// Samples in the request.
    pub received: usize,
    /// Distinct metrics written after folding repeats.
    pub applied: usize,
}

#[derive(Debug, Serialize)]
pub struct AllMetrics {
    pub gauges: BTreeMap<String, f64>,
    pub counters: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub backend: &'static str,
    pub uptime_secs: i64,
}

async fn update_batch(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>, body: Bytes) -> Response {
    let result = async {
        let samples: Vec<MetricSample> = decode(&body)?;
        let applied = state.ingestor.apply_batch(&samples).await?;
        Ok::<_, ApiFailure>(BatchAccepted {
            received: samples.len(),
            applied,
        })
    }
    .await;
    respond(&trace_id, result)
}

async fn update_one(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>, body: Bytes) -> Response {
    let result = async {
        let sample: MetricSample = decode(&body)?;
        Ok::<_, ApiFailure>(state.ingestor.apply_sample(&sample).await?)
    }
    .await;
    respond(&trace_id, result)
}

/// Builds a sample from the `/update/:kind/:name/:value` path segments.
fn sample_from_path(kind: &str, id: String, raw: &str) -> Result<MetricSample, ApiFailure> {
    let invalid = |e: &dyn std::fmt::Display| ApiFailure::bad_request(format!("invalid {kind} value '{raw}': {e}"));
    match kind.parse::<MetricKind>()? {
        MetricKind::Gauge => raw.parse::<f64>().map(|v| MetricSample::gauge(id, v)).map_err(|e| invalid(&e)),
        MetricKind::Counter => raw.parse::<i64>().map(|d| MetricSample::counter(id, d)).map_err(|e| invalid(&e)),
    }
}

async fn update_path(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((kind, id, raw)): Path<(String, String, String)>,
) -> Response {
    let result = async {
        let sample = sample_from_path(&kind, id, &raw)?;
        Ok::<_, ApiFailure>(state.ingestor.apply_sample(&sample).await?)
    }
    .await;
    respond(&trace_id, result)
}

async fn value_json(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>, body: Bytes) -> Response {
    let result = async {
        let name: MetricName = decode(&body)?;
        Ok::<_, ApiFailure>(state.ingestor.value(&name).await?)
    }
    .await;
    respond(&trace_id, result)
}

async fn value_path(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Response {
    let result = async {
        let kind: MetricKind = kind.parse()?;
        Ok::<_, ApiFailure>(state.ingestor.value(&MetricName { id, kind }).await?)
    }
    .await;
    respond(&trace_id, result)
}

async fn all_metrics(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    let result = state.ingestor.all().await.map_err(ApiFailure::from).map(|set| AllMetrics {
        gauges: set.gauges.into_iter().collect(),
        counters: set.counters.into_iter().collect(),
    });
    respond(&trace_id, result)
}

async fn ping(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    match state.ingestor.all().await {
        Ok(_) => success_response(
            StatusCode::OK,
            &trace_id,
            Health {
                status: "ok",
                backend: state.backend,
                uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
            },
        ),
        Err(e) => {
            tracing::error!(error = %e, backend = state.backend, "Health check failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &trace_id, "storage_error", e.to_string())
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(all_metrics))
        .route("/ping", get(ping))
        .route("/update/", post(update_one))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/updates/", post(update_batch))
        .route("/value/", post(value_json))
        .route("/value/:kind/:name", get(value_path))
}
