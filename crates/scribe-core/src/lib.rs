//! Transcription runtime: task registry, cooperative control signals, the
//! chunked execution loop, worker dispatch and progress fan-out.
//!
//! The speech-recognition engine and the audio decoder are consumed through
//! the [`RecognitionEngine`] and [`AudioDecoder`] traits; everything else in
//! this crate is transport-agnostic and owns no I/O beyond those two seams.

mod broadcast;
mod chunk;
mod control;
mod decode;
mod engine;
mod error;
mod registry;
#[cfg(feature = "whisper")]
mod whisper;
mod worker;

pub use broadcast::{ProgressBroadcaster, TaskFeed};
pub use chunk::{ChunkEvent, ChunkOutcome, ChunkProcessor, ChunkSink, WindowSpan};
pub use control::{ControlSignal, PauseOutcome};
pub use decode::{AudioDecoder, DecodedAudio, FfmpegDecoder, ScriptedDecoder};
pub use engine::{RecognitionEngine, ScriptedEngine};
pub use error::CoreError;
pub use registry::TaskRegistry;
#[cfg(feature = "whisper")]
pub use whisper::WhisperEngine;
pub use worker::{Dispatcher, WorkerSettings, CHUNK_RETRIES};

pub use scribe_types::{ExportFormat, LogEntry, LogKind, Segment, Task, TaskId, TaskStatus};
