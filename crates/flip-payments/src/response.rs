//! Axum integration: payment errors as JSON responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::PaymentError;

/// Error body shared by every payment route
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&PaymentError> for ErrorBody {
    fn from(err: &PaymentError) -> Self {
        Self {
            error: err.kind().to_string(),
            details: err.details(),
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "Payment request failed");
        } else {
            tracing::debug!(error = %self, "Payment request rejected");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
