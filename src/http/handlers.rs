//! Ingest and health handlers.

use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::http::request::{header_str, request_id};
use crate::http::response::IngestResponse;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::{now_millis, GateError, InboundRequest};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /api/v1/events`: admit the request, then hand it to the sink.
pub async fn ingest(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let start = Instant::now();
    let request_id = request_id(&headers).to_string();
    let gate = state.inner.load_full();

    let request = InboundRequest {
        authorization: header_str(&headers, &header::AUTHORIZATION),
        origin: header_str(&headers, &header::ORIGIN),
        body: &body,
    };

    let admission = match gate.validator.validate(request, now_millis()).await {
        Ok(admission) => admission,
        Err(err) => {
            let mode = err.mode().map(|m| m.as_str()).unwrap_or("none");
            metrics::record_rejection(err.code());
            match &err {
                GateError::ProjectStore(_) | GateError::Infrastructure { .. } => {
                    state.stats.record_unavailable();
                    metrics::record_request(mode, "unavailable", start);
                    tracing::error!(request_id = %request_id, error = %err, "Admission failed on store error");
                }
                _ => {
                    state.stats.record_rejected();
                    metrics::record_request(mode, "rejected", start);
                    tracing::info!(
                        request_id = %request_id,
                        mode = mode,
                        reason = err.code(),
                        "Request rejected"
                    );
                }
            }
            return err.into_response();
        }
    };

    let mode = admission.mode.as_str();
    match state.sink.accept(&admission).await {
        Ok(receipt) => {
            state.stats.record_accepted(admission.mode, admission.degraded);
            metrics::record_request(mode, "accepted", start);
            tracing::debug!(
                request_id = %request_id,
                project_id = %admission.project.id,
                mode = mode,
                degraded = admission.degraded,
                processed = receipt.processed,
                skipped = receipt.skipped,
                "Request accepted"
            );
            (StatusCode::OK, Json(IngestResponse::accepted(receipt))).into_response()
        }
        Err(e) => {
            metrics::record_rejection("sink_unavailable");
            metrics::record_request(mode, "sink_error", start);
            tracing::error!(request_id = %request_id, error = %e, "Event sink failed");
            e.into_response()
        }
    }
}
