use scribe_types::TaskId;
use thiserror::Error;

/// Errors produced by the transcription runtime.
///
/// Engine and decoder failures are converted into these at the worker
/// boundary; they surface to callers either directly (registry/control
/// operations) or as the `error` field of a `Failed` task.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Audio decoding failed; fatal for the task, never retried.
    #[error("audio decode failed: {message}")]
    Decode { message: String },

    /// The recognition engine failed on one window after exhausting retries.
    #[error("transcription failed on window {window}: {message}")]
    Transcription { window: usize, message: String },

    /// The referenced task does not exist.
    #[error("task not found: {task_id}")]
    NotFound { task_id: TaskId },

    /// Deletion was requested for a task that still has a live worker.
    ///
    /// Pause/resume/cancel never produce this: repeated control requests
    /// are idempotent no-ops.
    #[error("task {task_id} is still active; cancel it before deleting")]
    Conflict { task_id: TaskId },
}
