//! HTTP error mapping

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use commerce_core::CoreError;
use commerce_payments::PaymentError;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub code: &'static str,
}

/// Everything a handler can fail with
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Malformed request outside the domain types (missing ids, bad query)
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Core(e) => match e {
                CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                CoreError::InsufficientStock { .. } => (StatusCode::CONFLICT, "INSUFFICIENT_STOCK"),
                CoreError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
                CoreError::Duplicate(_) => (StatusCode::CONFLICT, "DUPLICATE"),
                CoreError::ConcurrentModification(_) => {
                    (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
                }
                CoreError::Settlement(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SETTLEMENT_ERROR"),
                CoreError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
                CoreError::Database(_) | CoreError::Serialization(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
                }
            },
            ApiError::Payment(e) => match e {
                PaymentError::Gateway { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "GATEWAY_ERROR"),
                PaymentError::Signature(_) => (StatusCode::BAD_REQUEST, "SIGNATURE_ERROR"),
                PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "WEBHOOK_PARSE_ERROR"),
                PaymentError::UnsupportedProvider(_) => (StatusCode::NOT_FOUND, "UNSUPPORTED_PROVIDER"),
                PaymentError::NotConfigured(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_NOT_CONFIGURED")
                }
                PaymentError::Amount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                PaymentError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn user_message(&self) -> String {
        match self {
            ApiError::Core(e) => e.user_message(),
            ApiError::Payment(PaymentError::UnsupportedProvider(name)) => {
                format!("Unknown payment provider: {name}")
            }
            ApiError::Payment(e) => e.user_message().to_string(),
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::Internal(_) => "An error occurred processing your request.".into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();

        if status.is_server_error() {
            match &self {
                ApiError::Payment(PaymentError::Gateway { payload: Some(payload), .. }) => {
                    tracing::error!(error = %self, %payload, "Request failed");
                }
                _ => tracing::error!(error = %self, "Request failed"),
            }
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
        }

        let body = ErrorResponse {
            success: false,
            message: self.user_message(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(CoreError::Validation("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(CoreError::NotFound("order".into())), StatusCode::NOT_FOUND),
            (ApiError::from(CoreError::Settlement("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::from(PaymentError::Signature("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(PaymentError::gateway("paypal", "x")), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::from(PaymentError::NotConfigured("stripe".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.parts().0, expected, "{error}");
        }
    }

    #[test]
    fn test_settlement_details_not_echoed() {
        let error = ApiError::from(CoreError::Settlement("UNIQUE constraint failed".into()));
        assert!(!error.user_message().contains("UNIQUE"));
    }
}
