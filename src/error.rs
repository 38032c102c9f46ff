//! Error taxonomy shared by every lending operation.
//!
//! Each variant carries a human-readable message plus structured `details`
//! so callers can render their own representation (status codes, CLI output)
//! while still matching on the error [`ErrorKind`] programmatically.

use serde_json::{Value, json};
use thiserror::Error;

/// Programmatic classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    DuplicateRequest,
    NotAvailable,
    InvalidInput,
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    /// Referenced loan, reservation, book or patron does not exist.
    #[error("{message}")]
    NotFound { message: String, details: Value },
    /// Operation is not valid for the current status.
    #[error("{message}")]
    InvalidState { message: String, details: Value },
    /// Patron already holds an active reservation or loan for the same book.
    #[error("{message}")]
    DuplicateRequest { message: String, details: Value },
    /// No copy of the requested book is free.
    #[error("{message}")]
    NotAvailable { message: String, details: Value },
    /// Negative money, unset dates or non-positive periods.
    #[error("{message}")]
    InvalidInput { message: String, details: Value },
    #[error("{message}")]
    Internal { message: String, details: Value },
}

impl AppError {
    pub fn not_found(message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            details,
        }
    }
    pub fn invalid_state(message: impl Into<String>, details: Value) -> Self {
        Self::InvalidState {
            message: message.into(),
            details,
        }
    }
    pub fn duplicate(message: impl Into<String>, details: Value) -> Self {
        Self::DuplicateRequest {
            message: message.into(),
            details,
        }
    }
    pub fn not_available(message: impl Into<String>, details: Value) -> Self {
        Self::NotAvailable {
            message: message.into(),
            details,
        }
    }
    pub fn invalid_input(message: impl Into<String>, details: Value) -> Self {
        Self::InvalidInput {
            message: message.into(),
            details,
        }
    }
    pub fn internal(message: impl Into<String>, details: Value) -> Self {
        Self::Internal {
            message: message.into(),
            details,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::InvalidState { .. } => ErrorKind::InvalidState,
            AppError::DuplicateRequest { .. } => ErrorKind::DuplicateRequest,
            AppError::NotAvailable { .. } => ErrorKind::NotAvailable,
            AppError::InvalidInput { .. } => ErrorKind::InvalidInput,
            AppError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn details(&self) -> &Value {
        match self {
            AppError::NotFound { details, .. }
            | AppError::InvalidState { details, .. }
            | AppError::DuplicateRequest { details, .. }
            | AppError::NotAvailable { details, .. }
            | AppError::InvalidInput { details, .. }
            | AppError::Internal { details, .. } => details,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if matches!(e, sqlx::Error::RowNotFound) {
            return AppError::not_found("Row not found", json!({}));
        }

        if let Some(db) = e.as_database_error() {
            if db.is_unique_violation() {
                return AppError::duplicate(
                    "Unique constraint violation",
                    json!({ "constraint": db.constraint() }),
                );
            }
            if db.is_check_violation() {
                return AppError::invalid_state(
                    "Check constraint violation",
                    json!({ "constraint": db.constraint() }),
                );
            }
        }

        tracing::error!(error.cause_chain = ?e, error.message = %e, "Database error");
        AppError::internal("Database error", json!({}))
    }
}

pub type AppResult<T> = Result<T, AppError>;
