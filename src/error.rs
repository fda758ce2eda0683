//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`CallError`]: failures inside one call's bridge or its outbound REST
//!   collaborators. These never cross into the HTTP layer; the bridge logs them
//!   and keeps (or tears down) only the call they belong to.
//! - [`AppError`]: failures of an HTTP request, converted into a JSON response
//!   through actix's `ResponseError`.
//!
//! ## Error kinds on the call path:
//! - **SetupFailure**: signed-session fetch failed or a required setting is missing.
//!   Fatal to the agent leg only; the telephony socket stays up and silent.
//! - **Protocol**: a frame on either socket was not valid JSON for its protocol.
//!   The frame is dropped and the session continues.
//! - **TransferFailure**: a REST step of the human handoff failed. Logged, no retry.
//! - **Socket**: either WebSocket errored. Treated exactly like a close.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors raised while bridging a single call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The agent leg could not be set up
    #[error("Setup failure: {0}")]
    SetupFailure(String),

    /// A socket frame could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// A step of the human handoff failed
    #[error("Transfer failure: {0}")]
    TransferFailure(String),

    /// A WebSocket connection errored
    #[error("Socket error: {0}")]
    Socket(String),

    /// Transport-level failure talking to a REST collaborator
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A REST collaborator answered with a non-success status
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Convenience alias for the call path.
pub type CallResult<T> = Result<T, CallError>;

/// Custom error types for the HTTP surface.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Maps each error to a status code and a JSON body:
///
/// ```json
/// {
///   "success": false,
///   "error": {
///     "type": "bad_request",
///     "message": "Phone number is required",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "success": false,
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

pub type AppResult<T> = Result<T, AppError>;
