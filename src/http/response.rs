//! JSON error responses.
//!
//! Every failure leaves the relay as
//! `{success: false, error, errorCode, details?, retryable, requestId}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::payments::types::VerificationFailure;
use crate::relay::RelayError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: String,
    error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    retryable: bool,
    request_id: Option<String>,
}

/// An error ready to be rendered.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub retryable: bool,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            retryable: false,
            request_id: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn rate_limited() -> Self {
        let mut err = Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "Rate limit exceeded");
        err.retryable = true;
        err
    }

    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id.map(str::to_string);
        self
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let details = match &err {
            RelayError::Verification(failure) => failure_details(failure),
            RelayError::TransactionAlreadyUsed { tx_hash, content_id } => {
                Some(json!({ "txHash": tx_hash.to_string(), "boundContentId": content_id }))
            }
            _ => None,
        };
        // Internal details stay in the logs.
        let message = if status.is_server_error() && !err.is_retryable() {
            tracing::error!(code = err.code(), error = %err, "Request failed");
            "Internal server error".to_string()
        } else {
            err.to_string()
        };
        Self {
            status,
            code: err.code(),
            message,
            details,
            retryable: err.is_retryable(),
            request_id: None,
        }
    }
}

fn failure_details(failure: &VerificationFailure) -> Option<Value> {
    match failure {
        VerificationFailure::InsufficientAmount {
            expected,
            received,
            expected_wei,
            received_wei,
        } => Some(json!({
            "expected": expected,
            "received": received,
            "expectedWei": expected_wei.to_string(),
            "receivedWei": received_wei.to_string(),
        })),
        VerificationFailure::WrongRecipient { expected, actual } => {
            Some(json!({ "expected": expected, "actual": actual }))
        }
        VerificationFailure::ContentIdMismatch { expected, actual } => {
            Some(json!({ "expected": expected, "actual": actual }))
        }
        VerificationFailure::NotConfirmed { required, .. } => Some(json!({ "requiredConfirmations": required })),
        VerificationFailure::AttestationExpired { exp } => Some(json!({ "expiredAt": exp })),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
            error_code: self.code,
            details: self.details,
            retryable: self.retryable,
            request_id: self.request_id,
        };
        (self.status, Json(body)).into_response()
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
