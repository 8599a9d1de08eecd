//! Domain-focused API endpoint modules.
//!
//! Shared error mapping lives here in mod.rs.

mod address;
mod health;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use geoloop_core::GeoError;
use serde::Serialize;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A [`GeoError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    error: GeoError,
    request_id: Option<String>,
}

impl ApiError {
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    fn status(&self) -> StatusCode {
        match self.error {
            GeoError::Validation(_) => StatusCode::BAD_REQUEST,
            GeoError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            GeoError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            GeoError::Provider(_) => StatusCode::BAD_GATEWAY,
            GeoError::ToolCall(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GeoError> for ApiError {
    fn from(error: GeoError) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.error, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self.error, "Request rejected");
        }
        let body = self.error.to_body();
        (
            status,
            Json(ErrorResponse {
                error_code: body.error_code,
                message: body.message,
                request_id: self.request_id,
            }),
        )
            .into_response()
    }
}

// ── Re-exports ───────────────────────────────────────────────────

pub use address::{batch_parse, parse_address};
pub use health::{health, tools};
