//! Task lifecycle routes: upload, list, inspect, pause/resume/cancel, delete.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use scribe_types::Task;

use crate::error::ServerError;
use crate::state::AppState;

/// Content types accepted for upload.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "audio/mpeg", // MP3
    "audio/wav",
    "audio/wave",
    "audio/x-wav",
    "audio/flac",
    "audio/x-flac",
    "audio/mp4", // M4A
    "audio/x-m4a",
    "audio/ogg",
    "video/mp4",
    "video/x-matroska", // MKV
    "video/webm",
];

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/local", post(create_task_from_path))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/pause", post(pause_task))
        .route("/tasks/{id}/resume", post(resume_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
}

/// Accept a multipart audio upload, store it and submit a transcription task.
///
/// The single expected part is named `file`. Content type and size are
/// validated while the body streams in; the stored copy lands in a
/// randomized per-upload directory so concurrent uploads of the same
/// filename never collide.
async fn create_task(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Task>), ServerError> {
    debug!("received upload request");
    let max_upload_bytes = state.config.max_upload_mb * 1024 * 1024;

    let mut original_name: Option<String> = None;
    let mut file_data: Option<Vec<u8>> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        let field_name = field.name().unwrap_or("unknown").to_owned();
        if field_name != "file" {
            return Err(ServerError::BadRequest(format!(
                "Unknown field: {field_name}"
            )));
        }

        let file_name = field.file_name().unwrap_or("upload").to_owned();
        let content_type = field.content_type().unwrap_or("").to_owned();

        if !content_type.starts_with("audio/") && !content_type.starts_with("video/") {
            return Err(ServerError::BadRequest(format!(
                "Invalid file type: {content_type}. Only audio and video files are allowed."
            )));
        }
        if !ALLOWED_MIME_TYPES.contains(&content_type.as_str()) {
            return Err(ServerError::BadRequest(format!(
                "Unsupported file format: {content_type}. Supported formats: \
                 MP3, WAV, FLAC, M4A, OGG, MP4, MKV, WebM"
            )));
        }

        let mut data = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read file data: {e}")))?
        {
            if data.len() + chunk.len() > max_upload_bytes {
                return Err(ServerError::BadRequest(format!(
                    "File too large: {} bytes exceeds maximum of {}MB",
                    data.len() + chunk.len(),
                    state.config.max_upload_mb
                )));
            }
            data.extend_from_slice(&chunk);
        }

        original_name = Some(file_name);
        file_data = Some(data);
    }

    let data = file_data.ok_or_else(|| ServerError::BadRequest("No file uploaded".to_owned()))?;
    if data.is_empty() {
        return Err(ServerError::BadRequest("Uploaded file is empty".to_owned()));
    }
    let original_name = original_name.unwrap_or_else(|| "upload".to_owned());

    let dir = FsPath::new(&state.config.upload_dir).join(Uuid::new_v4().simple().to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ServerError::Internal(format!("failed to create upload directory: {e}")))?;
    let stored_path = dir.join(sanitize_filename(&original_name));
    tokio::fs::write(&stored_path, &data)
        .await
        .map_err(|e| ServerError::Internal(format!("failed to store uploaded file: {e}")))?;

    let source = stored_path.to_string_lossy().into_owned();
    let task = state.dispatcher.submit(source.clone()).await;
    info!(
        task_id = %task.id,
        stored_path = %source,
        original_name = %original_name,
        size_bytes = data.len(),
        "upload accepted and task submitted"
    );
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Deserialize)]
struct LocalTaskRequest {
    /// Filesystem path of an audio file already readable by the server.
    source: String,
}

/// Submit a transcription task for a file that already exists on disk.
async fn create_task_from_path(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LocalTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ServerError> {
    if req.source.trim().is_empty() {
        return Err(ServerError::BadRequest("audio file path is empty".to_owned()));
    }
    let path = FsPath::new(&req.source);
    if !path.exists() {
        return Err(ServerError::BadRequest(format!(
            "Audio file does not exist: {}",
            req.source
        )));
    }
    if !path.is_file() {
        return Err(ServerError::BadRequest(format!(
            "Path is not a file: {}",
            req.source
        )));
    }

    let task = state.dispatcher.submit(req.source.clone()).await;
    info!(task_id = %task.id, source = %req.source, "local-path task submitted");
    Ok((StatusCode::CREATED, Json(task)))
}

/// All known tasks, newest first.
async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<Task>> {
    Json(state.dispatcher.list().await)
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ServerError> {
    Ok(Json(state.dispatcher.get(&id).await?))
}

/// Ask the worker to pause at the next window boundary. Responds with the
/// current snapshot; the status flips once the worker actually stops.
async fn pause_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ServerError> {
    Ok(Json(state.dispatcher.pause(&id).await?))
}

async fn resume_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ServerError> {
    Ok(Json(state.dispatcher.resume(&id).await?))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ServerError> {
    Ok(Json(state.dispatcher.cancel(&id).await?))
}

/// Remove a task, stopping its worker first if it is still running.
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    state.dispatcher.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Keep alphanumerics, dots, dashes and underscores; replace the rest.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
