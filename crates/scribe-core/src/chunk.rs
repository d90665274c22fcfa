//! Windowed transcription.
//!
//! Decoded audio is cut into fixed windows and transcribed one window at a
//! time. Control flags are honored between windows only; a window that has
//! started always finishes. Every committed change flows through a
//! [`ChunkSink`] so the caller decides how events land in the task record.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::control::{ControlSignal, PauseOutcome};
use crate::decode::DecodedAudio;
use crate::engine::RecognitionEngine;
use crate::error::CoreError;

/// Progress once decoding is done and windowing starts.
pub(crate) const PROGRESS_DECODED: f32 = 0.10;
/// Progress once every window is transcribed; finalization covers the rest.
pub(crate) const PROGRESS_TRANSCRIBED: f32 = 0.90;

/// One window of the source audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpan {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub start_sample: usize,
    pub end_sample: usize,
}

/// Progress events emitted while a task's audio is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    /// Window plan is fixed; emitted once before the first window.
    Planned { total_windows: usize },
    /// A window finished and produced its text.
    WindowDone {
        span: WindowSpan,
        text: String,
        completed: usize,
        total: usize,
        progress: f32,
    },
    /// A window attempt failed and will be retried.
    WindowRetry {
        window: usize,
        attempt: u32,
        error: String,
    },
    /// Pause observed at a window boundary; `window` is the next to run.
    Paused { window: usize },
    /// Processing resumed at the same window it paused before.
    Resumed { window: usize },
}

/// How a processing run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Every window transcribed.
    Completed,
    /// Cancel observed at a boundary; windows before it are committed.
    Cancelled { after_windows: usize },
    /// A window exhausted its retries.
    Failed { window: usize, error: String },
}

/// Receives [`ChunkEvent`]s as they are committed.
///
/// An error from the sink aborts the run; the processor treats the task as
/// gone and stops without producing an outcome.
#[async_trait]
pub trait ChunkSink: Send {
    async fn on_event(&mut self, event: ChunkEvent) -> Result<(), CoreError>;
}

/// Cuts audio into windows and drives them through a [`RecognitionEngine`].
pub struct ChunkProcessor {
    engine: Arc<dyn RecognitionEngine>,
    window_ms: u64,
    language: Option<String>,
    retries: u32,
}

impl ChunkProcessor {
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        window_ms: u64,
        language: Option<String>,
        retries: u32,
    ) -> Self {
        Self {
            engine,
            window_ms: window_ms.max(1),
            language,
            retries,
        }
    }

    /// Window plan for `audio`: `ceil(duration / window)` spans, the last
    /// one possibly shorter.
    pub fn plan(&self, audio: &DecodedAudio) -> Vec<WindowSpan> {
        plan_windows(audio, self.window_ms)
    }

    /// Process `audio` window by window until done, cancelled, paused out,
    /// or failed.
    ///
    /// Cancel wins over pause when both are requested. Returns `Err` only
    /// when the sink rejects a commit.
    pub async fn run(
        &self,
        audio: &DecodedAudio,
        control: &ControlSignal,
        sink: &mut dyn ChunkSink,
    ) -> Result<ChunkOutcome, CoreError> {
        let plan = self.plan(audio);
        let total = plan.len();
        sink.on_event(ChunkEvent::Planned {
            total_windows: total,
        })
        .await?;
        debug!(windows = total, window_ms = self.window_ms, "window plan fixed");

        for span in plan {
            if control.cancel_requested() {
                return Ok(ChunkOutcome::Cancelled {
                    after_windows: span.index,
                });
            }
            if control.pause_requested() {
                sink.on_event(ChunkEvent::Paused { window: span.index }).await?;
                match control.wait_while_paused().await {
                    PauseOutcome::Resumed => {
                        sink.on_event(ChunkEvent::Resumed { window: span.index })
                            .await?;
                    }
                    PauseOutcome::Cancelled => {
                        return Ok(ChunkOutcome::Cancelled {
                            after_windows: span.index,
                        });
                    }
                }
            }

            trace!(window = span.index, start_ms = span.start_ms, end_ms = span.end_ms, "window starting");
            let mut attempt = 0u32;
            let text = loop {
                attempt += 1;
                match self.transcribe_window(audio, &span).await {
                    Ok(text) => break text,
                    Err(error) => {
                        if attempt > self.retries {
                            return Ok(ChunkOutcome::Failed {
                                window: span.index,
                                error,
                            });
                        }
                        warn!(
                            window = span.index,
                            attempt,
                            error = %error,
                            "window transcription failed; retrying"
                        );
                        sink.on_event(ChunkEvent::WindowRetry {
                            window: span.index,
                            attempt,
                            error,
                        })
                        .await?;
                    }
                }
            };

            let completed = span.index + 1;
            let progress = PROGRESS_DECODED
                + (PROGRESS_TRANSCRIBED - PROGRESS_DECODED) * (completed as f32 / total as f32);
            sink.on_event(ChunkEvent::WindowDone {
                span,
                text,
                completed,
                total,
                progress,
            })
            .await?;
        }

        Ok(ChunkOutcome::Completed)
    }

    /// One engine call on a blocking thread. Errors come back as display
    /// strings; a panicked engine counts as a failed attempt.
    async fn transcribe_window(
        &self,
        audio: &DecodedAudio,
        span: &WindowSpan,
    ) -> Result<String, String> {
        let engine = Arc::clone(&self.engine);
        let samples = Arc::clone(&audio.samples);
        let sample_rate = audio.sample_rate;
        let language = self.language.clone();
        let (start, end) = (span.start_sample, span.end_sample);
        let handle = tokio::task::spawn_blocking(move || {
            engine.transcribe(&samples[start..end], sample_rate, language.as_deref())
        });
        match handle.await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(error)) => Err(format!("{error:#}")),
            Err(join_error) => Err(format!("transcription worker panicked: {join_error}")),
        }
    }
}

fn plan_windows(audio: &DecodedAudio, window_ms: u64) -> Vec<WindowSpan> {
    let duration = audio.duration_ms;
    if duration == 0 {
        return Vec::new();
    }
    let count = duration.div_ceil(window_ms) as usize;
    let rate = u64::from(audio.sample_rate);
    (0..count)
        .map(|index| {
            let start_ms = index as u64 * window_ms;
            let end_ms = (start_ms + window_ms).min(duration);
            let start_sample = (start_ms * rate / 1000) as usize;
            let end_sample = if index + 1 == count {
                // The last window absorbs any sub-millisecond tail.
                audio.samples.len()
            } else {
                (end_ms * rate / 1000) as usize
            };
            WindowSpan {
                index,
                start_ms,
                end_ms,
                start_sample,
                end_sample,
            }
        })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────────
