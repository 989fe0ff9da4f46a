//! Response bodies and error-to-status mapping.
//!
//! # Design Decisions
//! - Every ingest response carries `success`; rejections add a stable `reason`
//! - Infrastructure details stay in logs, never in response bodies

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::security::GateError;
use crate::sink::{SinkError, SinkReceipt};

/// Body of every `POST /api/v1/events` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IngestResponse {
    pub fn accepted(receipt: SinkReceipt) -> Self {
        Self {
            success: true,
            processed: Some(receipt.processed),
            skipped: Some(receipt.skipped),
            reason: None,
            message: None,
        }
    }

    pub fn rejected(reason: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            processed: None,
            skipped: None,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }
}

/// HTTP status for a gate failure.
pub fn gate_status(err: &GateError) -> StatusCode {
    match err {
        GateError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        GateError::UnknownProject => StatusCode::UNAUTHORIZED,
        GateError::InvalidCredential | GateError::Rejected { .. } => StatusCode::FORBIDDEN,
        GateError::ProjectStore(_) | GateError::Infrastructure { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = gate_status(&self);
        let body = IngestResponse::rejected(self.code(), self.public_message());
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for SinkError {
    fn into_response(self) -> Response {
        let body = IngestResponse::rejected("sink_unavailable", "event sink unavailable");
        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}
