use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::Value;
use wx_domain::{
    read_archive, window_slice, ModelRegistry, ProcessedRecord, RegistryError, TimeWindow,
    CO2_SENSOR_MODEL, PRESSURE_SENSOR_MODEL,
};

use crate::latest::LatestReading;
use crate::sinks::RecordSink;

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: &'static ModelRegistry,
    pub latest: LatestReading,
    pub push_sink: Arc<dyn RecordSink>,
    pub store_path: PathBuf,
    pub metrics: Option<PrometheusHandle>,
}

/// Builds the service router.
///
/// The push endpoints keep their historical per-device paths so the wired
/// sensors do not need re-flashing. `/metrics` only exists when the
/// Prometheus recorder is installed.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(health))
        .route("/loc1/BMP390", post(push_pressure))
        .route("/loc1/SCD30", post(push_co2))
        .route("/latest", get(latest))
        .route("/history", get(history));
    if state.metrics.is_some() {
        router = router.route("/metrics", get(render_metrics));
    }
    router.with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn push_pressure(State(state): State<AppState>, body: Bytes) -> Response {
    push_record(&state, PRESSURE_SENSOR_MODEL, &body).await
}

async fn push_co2(State(state): State<AppState>, body: Bytes) -> Response {
    push_record(&state, CO2_SENSOR_MODEL, &body).await
}

/// Shared push path: decode, check the record against the endpoint's model,
/// enrich, and write straight to the time-series sink.
async fn push_record(state: &AppState, expected_model: &str, body: &[u8]) -> Response {
    metrics::counter!("http_push_requests_total").increment(1);

    let envelope: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "push body is not JSON");
            return (StatusCode::BAD_REQUEST, "body is not valid JSON\n").into_response();
        }
    };

    let raw = match state.registry.decode(&envelope) {
        Ok(raw) => raw,
        Err(e @ RegistryError::UnknownModel(_)) => {
            tracing::warn!(error = %e, "push record for unregistered model");
            return (StatusCode::UNPROCESSABLE_ENTITY, format!("{e}\n")).into_response();
        }
        Err(e) => {
            tracing::warn!(error = %e, "push record failed to decode");
            return (StatusCode::BAD_REQUEST, format!("{e}\n")).into_response();
        }
    };

    if raw.model() != expected_model {
        tracing::warn!(
            model = raw.model(),
            expected = expected_model,
            "push record does not match its endpoint"
        );
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("endpoint accepts {expected_model} records\n"),
        )
            .into_response();
    }

    let record = ProcessedRecord::enrich(raw);
    match state.push_sink.write(std::slice::from_ref(&record)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            metrics::counter!("http_push_sink_errors_total").increment(1);
            tracing::error!(error = %e, "push write to the time-series sink failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "time-series write failed\n",
            )
                .into_response()
        }
    }
}

async fn latest(State(state): State<AppState>) -> Response {
    match state.latest.snapshot() {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, "no readings received yet\n").into_response(),
    }
}

#[derive(Deserialize)]
struct HistoryParams {
    from: i64,
    to: i64,
}

async fn history(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> Response {
    metrics::counter!("http_history_requests_total").increment(1);

    let records = match read_archive(&state.store_path).await {
        Ok(records) => records,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read the archive for a history query");
            return (StatusCode::INTERNAL_SERVER_ERROR, "archive unreadable\n").into_response();
        }
    };

    let window = TimeWindow {
        from: params.from,
        to: params.to,
    };
    match window_slice(&records, window) {
        Ok(slice) => Json(slice).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "archive contains an unreadable timestamp");
            (StatusCode::INTERNAL_SERVER_ERROR, "archive corrupted\n").into_response()
        }
    }
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
