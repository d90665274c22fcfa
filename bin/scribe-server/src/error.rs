//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! **Security note:** Internal errors are logged with full detail but only
//! a generic message is returned to the caller so that file paths or other
//! implementation details never leak to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scribe_core::CoreError;
use scribe_export::ExportError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the scribe-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the transcription runtime.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Propagated from the export encoder.
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Client-facing runtime errors: expose the message directly.
            ServerError::Core(e) => match e {
                CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
                CoreError::Conflict { .. } => (StatusCode::CONFLICT, e.to_string()),
                // Decode/transcription failures belong to the worker, not the
                // request path; reaching here is a programming error.
                CoreError::Decode { .. } | CoreError::Transcription { .. } => {
                    error!(error = %e, "runtime error in request path");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_owned(),
                    )
                }
            },
            ServerError::Export(e) => match e {
                ExportError::NoContent { .. } => (StatusCode::CONFLICT, e.to_string()),
                ExportError::Encode { .. } => {
                    error!(error = %e, "export encoding failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_owned(),
                    )
                }
            },
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        // Log the full error chain before discarding it so that diagnostic
        // detail is preserved in the server logs even though clients only
        // see a generic message.
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}
