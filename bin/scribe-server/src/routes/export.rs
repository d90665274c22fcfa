//! Transcript download route.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http::header;
use serde::Deserialize;
use tracing::debug;

use scribe_types::ExportFormat;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/{id}/export", get(export_task))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    /// Output format; defaults to plain text when omitted.
    format: Option<ExportFormat>,
}

/// Render the task's transcript as a downloadable file.
///
/// Works on any task that has segments, including failed or cancelled ones
/// with a partial transcript. Tasks with nothing to export respond 409.
async fn export_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ServerError> {
    let format = query.format.unwrap_or(ExportFormat::Txt);
    let task = state.dispatcher.get(&id).await?;
    let bytes = scribe_export::render(&task, format)?;
    debug!(task_id = %task.id, %format, size_bytes = bytes.len(), "export rendered");

    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        task.id,
        format.file_extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
