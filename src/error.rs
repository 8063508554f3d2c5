use crate::models::TransactionStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Transaction {0} not found")]
    NotFound(Uuid),

    #[error("Transaction {id} is {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: TransactionStatus,
        expected: TransactionStatus,
    },

    #[error("Cannot apply {event} to a transaction in {from}")]
    InvalidTransition {
        from: TransactionStatus,
        event: &'static str,
    },

    #[error("A rejection reason is required")]
    MissingReason,

    #[error("Transaction {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Real-time session not ready: {0}")]
    SessionNotReady(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing or invalid credentials")]
    Unauthorized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Whether the caller may re-issue the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::GatewayUnavailable(_)
                | WalletError::SessionNotReady(_)
                | WalletError::Conflict(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            WalletError::NotFound(_) => "NOT_FOUND",
            WalletError::InvalidState { .. } => "INVALID_STATE",
            WalletError::InvalidTransition { .. } => "INVALID_TRANSITION",
            WalletError::MissingReason => "MISSING_REASON",
            WalletError::Conflict(_) => "CONFLICT",
            WalletError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            WalletError::SessionNotReady(_) => "SESSION_NOT_READY",
            WalletError::InvalidInput(_) => "INVALID_INPUT",
            WalletError::Unauthorized => "UNAUTHORIZED",
            WalletError::Storage(_) => "STORAGE_ERROR",
            WalletError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            WalletError::NotFound(_) => StatusCode::NOT_FOUND,
            WalletError::InvalidState { .. }
            | WalletError::InvalidTransition { .. }
            | WalletError::Conflict(_) => StatusCode::CONFLICT,
            WalletError::MissingReason | WalletError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            WalletError::GatewayUnavailable(_) | WalletError::SessionNotReady(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            WalletError::Unauthorized => StatusCode::UNAUTHORIZED,
            WalletError::Storage(_) | WalletError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<redis::RedisError> for WalletError {
    fn from(err: redis::RedisError) -> Self {
        WalletError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Storage(format!("Corrupt transaction record: {}", err))
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub is_success: bool,
    pub error: String,
    pub error_code: String,
    pub retryable: bool,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
}

impl IntoResponse for WalletError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let status = self.status_code();
        let error_code = self.error_code();

        let body = ErrorResponse {
            is_success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            retryable: self.is_retryable(),
            timestamp: Utc::now(),
            request_id,
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, error_code = error_code, "Request failed");
        } else {
            tracing::warn!(error = %self, error_code = error_code, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}
