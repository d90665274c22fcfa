//! Shared task model for the scribe workspace.
//!
//! A [`Task`] is one transcription job tracked through its lifecycle. All
//! crates exchange immutable `Task` snapshots; mutation happens only inside
//! the registry's single-writer update path in `scribe-core`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a transcription task (UUID v4, simple form).
pub type TaskId = String;

/// High-level lifecycle state of a transcription task.
///
/// Terminal states are [`Completed`], [`Failed`] and [`Cancelled`]; once a
/// task reaches one of them its record becomes read-only except for deletion.
///
/// [`Completed`]: TaskStatus::Completed
/// [`Failed`]: TaskStatus::Failed
/// [`Cancelled`]: TaskStatus::Cancelled
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, not yet claimed by a worker.
    Queued,
    /// A worker is decoding or transcribing.
    Running,
    /// The worker observed a pause request at a window boundary.
    Paused,
    /// All windows transcribed; result finalized.
    Completed,
    /// Decode failed, or a window exhausted its retries.
    Failed,
    /// A cancel request was observed before completion.
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` once the task can no longer change state.
    ///
    /// Callers polling a task until it is done should use this rather than
    /// matching individual variants.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Returns `true` while the task still has (or awaits) a live worker.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// A time-bounded span of recognized text within a task.
///
/// Segments are append-only: `index` is assigned at append time and never
/// reused, and `start_ms < end_ms` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Zero-based position in the task's segment list.
    pub index: usize,
    /// Start offset in milliseconds, relative to the source audio.
    pub start_ms: u64,
    /// End offset in milliseconds, relative to the source audio.
    pub end_ms: u64,
    /// Recognized text; may be empty for silent windows.
    pub text: String,
}

/// Severity / kind of a task log entry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogKind {
    Info,
    Warning,
    Error,
    /// Per-window advancement; carries the `progress` field.
    Progress,
}

/// One append-only entry in a task's activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    /// Present only on [`LogKind::Progress`] entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
}

/// One transcription job and everything observers may see about it.
///
/// Field order matches the wire snapshot pushed to subscribers and returned
/// by the HTTP surface. `revision` is internal: it counts committed updates
/// so consumers can order snapshots, and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Overall completion in `[0, 1]`; non-decreasing while active.
    pub progress: f32,
    /// Human-readable description of the current state.
    pub message: String,
    /// Accumulated transcript; grows as windows complete.
    pub result_text: Option<String>,
    /// Append-only, ordered by append time.
    pub segments: Vec<Segment>,
    /// Opaque descriptor of the input; not interpreted by the core.
    pub source: String,
    /// Short terminal diagnostic, set only on `Failed`.
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic per-task commit counter; not part of the wire snapshot.
    #[serde(skip)]
    pub revision: u64,
}

impl Task {
    /// Build a fresh `Queued` task for the given source descriptor.
    pub fn new(source: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut task = Self {
            id: Uuid::new_v4().simple().to_string(),
            status: TaskStatus::Queued,
            progress: 0.0,
            message: "queued".to_owned(),
            result_text: None,
            segments: Vec::new(),
            source: source.into(),
            error: None,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
            revision: 0,
        };
        task.log(LogKind::Info, "task created");
        task
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raise `progress` to `value`, clamped to `[0, 1]`.
    ///
    /// Lower values are ignored so progress never moves backwards, no matter
    /// what a caller computes.
    pub fn advance_progress(&mut self, value: f32) {
        let clamped = value.clamp(0.0, 1.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
    }

    /// Append one segment, assigning the next free index.
    pub fn push_segment(&mut self, start_ms: u64, end_ms: u64, text: impl Into<String>) {
        let index = self.segments.len();
        self.segments.push(Segment {
            index,
            start_ms,
            end_ms,
            text: text.into(),
        });
    }

    /// Append a log entry without a progress value.
    pub fn log(&mut self, kind: LogKind, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            progress: None,
        });
    }

    /// Append a [`LogKind::Progress`] entry carrying the given fraction.
    pub fn log_progress(&mut self, message: impl Into<String>, progress: f32) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            kind: LogKind::Progress,
            message: message.into(),
            progress: Some(progress),
        });
    }
}

/// Supported export renderings of a task's transcript.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    /// Plain text: concatenated segment texts.
    Txt,
    /// SubRip subtitles.
    Srt,
    /// Structured JSON: id, text and the segment list.
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "text/plain; charset=utf-8",
            ExportFormat::Srt => "application/x-subrip",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Srt => "srt",
            ExportFormat::Json => "json",
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
