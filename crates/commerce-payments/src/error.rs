//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Provider call failed or returned an unexpected shape
    #[error("{provider} gateway error: {message}")]
    Gateway {
        provider: String,
        message: String,
        /// Raw provider response, for server-side logs only
        payload: Option<serde_json::Value>,
    },

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    Signature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Path segment does not name a known provider
    #[error("Unsupported payment provider: {0}")]
    UnsupportedProvider(String),

    /// Known provider without credentials in this deployment
    #[error("Payment provider not configured: {0}")]
    NotConfigured(String),

    /// Amount cannot be represented in the provider's units
    #[error("Invalid amount: {0}")]
    Amount(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    pub fn gateway(provider: impl std::fmt::Display, message: impl Into<String>) -> Self {
        PaymentError::Gateway {
            provider: provider.to_string(),
            message: message.into(),
            payload: None,
        }
    }

    pub fn gateway_with_payload(
        provider: impl std::fmt::Display,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        PaymentError::Gateway {
            provider: provider.to_string(),
            message: message.into(),
            payload: Some(payload),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Gateway { .. })
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::Gateway { .. } => "Payment processing failed. Please try again.",
            PaymentError::Signature(_) => "Webhook signature verification failed.",
            PaymentError::WebhookParse(_) => "Webhook payload could not be read.",
            PaymentError::UnsupportedProvider(_) => "Unknown payment provider.",
            PaymentError::NotConfigured(_) => "This payment provider is not available.",
            PaymentError::Amount(_) => "The payment amount is invalid.",
            PaymentError::Config(_) => "Service configuration error.",
        }
    }
}
