use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::SignUpStep;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Caller is not the game owner")]
    Unauthorized,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Address is already registered")]
    DuplicateRegistration,

    #[error("Insufficient fee")]
    InsufficientFee,

    #[error("Already joined this world")]
    DuplicateJoin,

    #[error("World not found")]
    WorldNotFound,

    #[error("User not found. Please sign up")]
    UserNotFound,

    #[error("City does not exist")]
    CityNotFound,

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Transaction {tx_hash} still pending after {waited_secs}s")]
    PendingTooLong { tx_hash: String, waited_secs: u64 },

    #[error("Sign-up failed at {step} step: {source}")]
    SignUpFailed {
        step: SignUpStep,
        #[source]
        source: Box<AppError>,
    },

    #[error("Wallet not connected")]
    NoWallet,

    #[error("Another session operation is still pending")]
    SessionBusy,

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Blockchain RPC error: {0}")]
    BlockchainRPC(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Maps a contract revert reason onto the typed taxonomy.
    pub fn classify_revert(reason: &str) -> Option<AppError> {
        let lowered = reason.to_ascii_lowercase();
        let matched = if lowered.contains("user rejected") || lowered.contains("user denied") {
            AppError::SubmissionRejected(reason.trim().to_string())
        } else if lowered.contains("only owner") || lowered.contains("caller is not the owner") {
            AppError::Unauthorized
        } else if lowered.contains("insufficient fee") {
            AppError::InsufficientFee
        } else if lowered.contains("already joined") {
            AppError::DuplicateJoin
        } else if lowered.contains("already registered") {
            AppError::DuplicateRegistration
        } else if lowered.contains("world does not exist")
            || lowered.contains("invalid world id")
            || lowered.contains("world is not active")
        {
            AppError::WorldNotFound
        } else if lowered.contains("city does not exist") {
            AppError::CityNotFound
        } else if lowered.contains("invalid world parameters") || lowered.contains("invalid troops")
        {
            AppError::InvalidParameters(reason.trim().to_string())
        } else if lowered.contains("username") {
            AppError::InvalidUsername(reason.trim().to_string())
        } else {
            return None;
        };
        Some(matched)
    }

    /// Like `classify_revert`, but keeps unknown reasons as `Reverted`.
    pub fn from_revert_reason(reason: &str) -> AppError {
        Self::classify_revert(reason).unwrap_or_else(|| AppError::Reverted(reason.trim().to_string()))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::InvalidParameters(_) => "INVALID_PARAMETERS",
            AppError::InvalidUsername(_) => "INVALID_USERNAME",
            AppError::DuplicateRegistration => "DUPLICATE_REGISTRATION",
            AppError::InsufficientFee => "INSUFFICIENT_FEE",
            AppError::DuplicateJoin => "DUPLICATE_JOIN",
            AppError::WorldNotFound => "WORLD_NOT_FOUND",
            AppError::UserNotFound => "USER_NOT_FOUND",
            AppError::CityNotFound => "CITY_NOT_FOUND",
            AppError::SubmissionRejected(_) => "SUBMISSION_REJECTED",
            AppError::PendingTooLong { .. } => "PENDING_TOO_LONG",
            AppError::SignUpFailed { .. } => "SIGN_UP_FAILED",
            AppError::NoWallet => "NO_WALLET",
            AppError::SessionBusy => "SESSION_BUSY",
            AppError::Reverted(_) => "REVERTED",
            AppError::BlockchainRPC(_) => "BLOCKCHAIN_RPC_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::FORBIDDEN,
            AppError::InvalidParameters(_)
            | AppError::InvalidUsername(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientFee => StatusCode::PAYMENT_REQUIRED,
            AppError::DuplicateRegistration | AppError::DuplicateJoin | AppError::SessionBusy => {
                StatusCode::CONFLICT
            }
            AppError::WorldNotFound
            | AppError::UserNotFound
            | AppError::CityNotFound
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoWallet => StatusCode::UNAUTHORIZED,
            AppError::SubmissionRejected(_) | AppError::Reverted(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::PendingTooLong { .. } => StatusCode::ACCEPTED,
            AppError::SignUpFailed { source, .. } => source.status(),
            AppError::BlockchainRPC(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = match &self {
            AppError::SignUpFailed { step, source } => Some(serde_json::json!({
                "step": step,
                "cause": source.code(),
            })),
            AppError::PendingTooLong { tx_hash, .. } => Some(serde_json::json!({
                "tx_hash": tx_hash,
            })),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details,
            },
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
