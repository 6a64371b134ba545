//! Error Types for Order Settlement

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed or incomplete request data
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced order, SKU or status does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Debit would take a SKU below zero while oversell is disabled
    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: i64,
        available: i64,
    },

    /// Status change not allowed from the current state
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Write conflicts with an existing record (e.g. settled gateway reference)
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// SKU row changed underneath a conditional update
    #[error("Concurrent modification of {0}")]
    ConcurrentModification(String),

    /// Failure inside the atomic settlement transaction
    #[error("Settlement failed: {0}")]
    Settlement(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Database(_) | CoreError::ConcurrentModification(_) | CoreError::Settlement(_)
        )
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Validation(msg) => msg.clone(),
            CoreError::NotFound(what) => format!("{what} not found"),
            CoreError::InsufficientStock { sku, .. } => {
                format!("Not enough stock for {sku}")
            }
            CoreError::InvalidTransition { from, to } => {
                format!("Order cannot move from {from} to {to}")
            }
            CoreError::Duplicate(msg) => msg.clone(),
            CoreError::ConcurrentModification(_) => {
                "The order was modified concurrently. Please retry.".into()
            }
            CoreError::Settlement(_) => "Payment could not be settled. Please try again.".into(),
            _ => "An error occurred processing your request.".into(),
        }
    }

    /// Fold storage-level failures into a settlement failure.
    ///
    /// Domain errors keep their kind so callers can still map them precisely.
    pub fn into_settlement(self) -> Self {
        match self {
            CoreError::Database(e) => CoreError::Settlement(e.to_string()),
            CoreError::Serialization(e) => CoreError::Settlement(e.to_string()),
            CoreError::ConcurrentModification(sku) => {
                CoreError::Settlement(format!("concurrent modification of {sku}"))
            }
            other => other,
        }
    }
}

/// Whether a sqlx error is a unique-constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Whether a sqlx error is a foreign-key violation
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_foreign_key_violation(),
        _ => false,
    }
}
