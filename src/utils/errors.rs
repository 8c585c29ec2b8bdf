use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::api::getnet::ApiError;
use crate::utils::encryption::CryptoError;

/// Application-wide error taxonomy.
///
/// Domain errors (`Validation`, `NotFound`, `Conflict`) are raised by the
/// services; the gateway variants carry a sanitized, user-facing message and
/// never the raw provider payload.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// Card verification failed at the gateway
    #[error("{0}")]
    GatewayRejected(String),
    /// Payment declined or a payment-mutating gateway call failed
    #[error("{0}")]
    GatewayAuthorization(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] ApiError),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Database error: {}", clean_db_error(.0))]
    Database(#[from] sqlx::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

/// Client-facing error body: machine-readable code plus human message
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub const CARD_REJECTED_MESSAGE: &'static str =
        "Unfortunately this card did not pass validation.";
    pub const PAYMENT_FAILED_MESSAGE: &'static str =
        "The payment could not be completed. Please check your data and try again.";

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn card_rejected() -> Self {
        AppError::GatewayRejected(Self::CARD_REJECTED_MESSAGE.to_string())
    }

    pub fn payment_not_completed() -> Self {
        AppError::GatewayAuthorization(Self::PAYMENT_FAILED_MESSAGE.to_string())
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::GatewayRejected(_) => "CARD_REJECTED",
            AppError::GatewayAuthorization(_) => "PAYMENT_NOT_COMPLETED",
            AppError::Gateway(_) => "GATEWAY_ERROR",
            AppError::Credential(_) => "GATEWAY_CREDENTIAL_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-equivalent status for the error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::GatewayRejected(_) | AppError::GatewayAuthorization(_) => {
                StatusCode::NOT_ACCEPTABLE
            }
            AppError::Gateway(_) | AppError::Credential(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response body. Server-side failures get a generic message.
    pub fn body(&self) -> ErrorBody {
        let message = if self.status().is_server_error() {
            "An internal error occurred, please try again later.".to_string()
        } else {
            self.to_string()
        };

        ErrorBody {
            code: self.code(),
            message,
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        AppError::Credential(err.to_string())
    }
}

fn clean_db_error(err: &sqlx::Error) -> String {
    extract_clean_error(&err.to_string())
}

/// Extract clean error message from database error strings
///
/// Removes technical error codes and prefixes like:
/// "error returned from database: 1452 (23000): Cannot add or update a child row"
///
/// Returns only the meaningful error message:
/// "Cannot add or update a child row"
pub fn extract_clean_error(error_msg: &str) -> String {
    if error_msg.contains("error returned from database:") {
        // Everything after the last colon is the actual message
        if let Some(last_colon) = error_msg.rfind(": ") {
            error_msg[last_colon + 2..].trim().to_string()
        } else {
            error_msg.to_string()
        }
    } else {
        error_msg.to_string()
    }
}
