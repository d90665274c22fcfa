//! Task dispatch and the worker loop.
//!
//! [`Dispatcher`] is the facade the transport layer talks to: it owns the
//! registry, the progress broadcaster, the engine and decoder seams, and a
//! semaphore bounding how many tasks transcribe at once. Each submitted task
//! gets one spawned worker; control requests only flip the task's
//! [`ControlSignal`] and the worker commits the resulting state at window
//! boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scribe_types::{LogKind, Task, TaskId, TaskStatus};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::broadcast::{ProgressBroadcaster, TaskFeed};
use crate::chunk::{ChunkEvent, ChunkOutcome, ChunkProcessor, ChunkSink, PROGRESS_DECODED};
use crate::control::ControlSignal;
use crate::decode::AudioDecoder;
use crate::engine::RecognitionEngine;
use crate::error::CoreError;
use crate::registry::TaskRegistry;

/// Retries per window before the task fails.
pub const CHUNK_RETRIES: u32 = 2;

const DEFAULT_WINDOW_MS: u64 = 30_000;
const DEFAULT_CONCURRENCY: usize = 2;

/// Tuning for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Transcription window length in milliseconds.
    pub window_ms: u64,
    /// Language hint passed to the engine; `None` means auto-detect.
    pub language: Option<String>,
    /// Tasks transcribing at once. Clamped to 1..=2.
    pub concurrency: usize,
    /// Retries per window before the task fails.
    pub retries: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            language: None,
            concurrency: DEFAULT_CONCURRENCY,
            retries: CHUNK_RETRIES,
        }
    }
}

struct TaskControl {
    signal: Arc<ControlSignal>,
    abort: AbortHandle,
}

/// Owns the task runtime: registry, fan-out, engine, decoder, worker pool.
pub struct Dispatcher {
    registry: TaskRegistry,
    broadcaster: ProgressBroadcaster,
    engine: Arc<dyn RecognitionEngine>,
    decoder: Arc<dyn AudioDecoder>,
    settings: WorkerSettings,
    permits: Arc<Semaphore>,
    controls: RwLock<HashMap<TaskId, TaskControl>>,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        decoder: Arc<dyn AudioDecoder>,
        mut settings: WorkerSettings,
    ) -> Self {
        settings.concurrency = settings.concurrency.clamp(1, 2);
        Self {
            registry: TaskRegistry::new(),
            broadcaster: ProgressBroadcaster::new(),
            engine,
            decoder,
            permits: Arc::new(Semaphore::new(settings.concurrency)),
            settings,
            controls: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Register a task for `source` and spawn its worker.
    ///
    /// The returned snapshot is the freshly queued task; the worker starts
    /// as soon as a pool permit is free.
    pub async fn submit(self: &Arc<Self>, source: impl Into<String>) -> Task {
        let task = self.registry.create(source).await;
        let id = task.id.clone();
        self.broadcaster.open(&id).await;

        let signal = Arc::new(ControlSignal::default());
        let worker = Arc::clone(self);
        let worker_signal = Arc::clone(&signal);
        let worker_source = task.source.clone();
        let worker_id = id.clone();
        let handle = tokio::spawn(async move {
            worker.run_task(worker_id, worker_source, worker_signal).await;
        });
        self.controls.write().await.insert(
            id.clone(),
            TaskControl {
                signal,
                abort: handle.abort_handle(),
            },
        );

        self.broadcaster.publish(&task).await;
        info!(task_id = %id, source = %task.source, "task submitted");
        task
    }

    pub async fn get(&self, id: &str) -> Result<Task, CoreError> {
        self.registry.get(id).await
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Vec<Task> {
        self.registry.list().await
    }

    /// Live snapshot feed for one task. See [`ProgressBroadcaster::subscribe`].
    pub async fn subscribe(&self, id: &str) -> Result<TaskFeed, CoreError> {
        self.broadcaster.subscribe(&self.registry, id).await
    }

    /// Ask the task to pause at its next window boundary.
    ///
    /// Terminal tasks and repeated requests are no-ops; the returned
    /// snapshot reflects whatever the worker has committed so far.
    pub async fn pause(&self, id: &str) -> Result<Task, CoreError> {
        let snapshot = self.registry.get(id).await?;
        if snapshot.is_terminal() {
            return Ok(snapshot);
        }
        if let Some(control) = self.controls.read().await.get(id) {
            if control.signal.request_pause() {
                debug!(task_id = %id, "pause requested");
            }
        }
        self.registry.get(id).await
    }

    /// Let a paused task continue. No-op unless a pause is in effect.
    pub async fn resume(&self, id: &str) -> Result<Task, CoreError> {
        let snapshot = self.registry.get(id).await?;
        if snapshot.is_terminal() {
            return Ok(snapshot);
        }
        if let Some(control) = self.controls.read().await.get(id) {
            if control.signal.request_resume() {
                debug!(task_id = %id, "resume requested");
            }
        }
        self.registry.get(id).await
    }

    /// Ask the task to stop at its next window boundary, keeping the
    /// segments committed so far. Terminal tasks are left untouched.
    pub async fn cancel(&self, id: &str) -> Result<Task, CoreError> {
        let snapshot = self.registry.get(id).await?;
        if snapshot.is_terminal() {
            return Ok(snapshot);
        }
        if let Some(control) = self.controls.read().await.get(id) {
            if control.signal.request_cancel() {
                debug!(task_id = %id, "cancel requested");
            }
        }
        self.registry.get(id).await
    }

    /// Remove a task entirely, stopping its worker first if needed.
    pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
        self.registry.get(id).await?;
        if let Some(control) = self.controls.write().await.remove(id) {
            control.signal.request_cancel();
            control.abort.abort();
        }

        // The worker is gone after the abort; settle the record if it was
        // still mid-flight so removal passes the active-task guard.
        let current = self.registry.get(id).await?;
        if !current.is_terminal() {
            let cancelled = self
                .registry
                .update(id, |task| {
                    task.status = TaskStatus::Cancelled;
                    task.message = "cancelled".into();
                    task.log(LogKind::Info, "task cancelled");
                })
                .await?;
            self.broadcaster.publish(&cancelled).await;
        }
        self.registry.remove(id).await?;
        self.broadcaster.close(id).await;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Update the record and fan the snapshot out in one step.
    async fn commit(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Task),
    ) -> Result<Task, CoreError> {
        let snapshot = self.registry.update(id, mutate).await?;
        self.broadcaster.publish(&snapshot).await;
        Ok(snapshot)
    }

    async fn run_task(self: Arc<Self>, id: TaskId, source: String, signal: Arc<ControlSignal>) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };

        if let Err(error) = self.drive_task(&id, &source, &signal).await {
            // NotFound means the task was deleted under the worker.
            debug!(task_id = %id, %error, "worker stopped without finishing");
        }
        self.broadcaster.close(&id).await;
    }

    async fn drive_task(
        &self,
        id: &str,
        source: &str,
        signal: &ControlSignal,
    ) -> Result<(), CoreError> {
        if signal.cancel_requested() {
            self.commit(id, |task| {
                task.status = TaskStatus::Cancelled;
                task.message = "cancelled".into();
                task.log(LogKind::Info, "task cancelled before start");
            })
            .await?;
            return Ok(());
        }

        self.commit(id, |task| {
            task.status = TaskStatus::Running;
            task.message = "decoding audio".into();
            task.log(LogKind::Info, "transcription started");
        })
        .await?;

        let audio = match self.decoder.decode(source).await {
            Ok(audio) if audio.duration_ms > 0 => audio,
            Ok(_) => {
                self.fail(
                    id,
                    CoreError::Decode {
                        message: "decoded audio is empty".to_owned(),
                    },
                )
                .await?;
                return Ok(());
            }
            Err(error) => {
                self.fail(
                    id,
                    CoreError::Decode {
                        message: format!("{error:#}"),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        let duration_secs = audio.duration_ms as f64 / 1000.0;
        self.commit(id, move |task| {
            task.advance_progress(PROGRESS_DECODED);
            task.message = "audio decoded".into();
            task.log(LogKind::Info, format!("decoded {duration_secs:.1}s of audio"));
        })
        .await?;

        let processor = ChunkProcessor::new(
            Arc::clone(&self.engine),
            self.settings.window_ms,
            self.settings.language.clone(),
            self.settings.retries,
        );
        let mut sink = CommitSink {
            dispatcher: self,
            id,
        };
        let outcome = processor.run(&audio, signal, &mut sink).await?;

        match outcome {
            ChunkOutcome::Completed => {
                self.commit(id, |task| {
                    task.status = TaskStatus::Completed;
                    task.advance_progress(1.0);
                    task.message = "completed".into();
                    task.log(LogKind::Info, "transcription completed");
                })
                .await?;
                info!(task_id = %id, "task completed");
            }
            ChunkOutcome::Cancelled { after_windows } => {
                self.commit(id, move |task| {
                    task.status = TaskStatus::Cancelled;
                    task.message = "cancelled".into();
                    task.log(
                        LogKind::Info,
                        format!("task cancelled after {after_windows} windows"),
                    );
                })
                .await?;
                info!(task_id = %id, after_windows, "task cancelled");
            }
            ChunkOutcome::Failed { window, error } => {
                let attempts = self.settings.retries + 1;
                self.fail(
                    id,
                    CoreError::Transcription {
                        window,
                        message: format!("{error} (after {attempts} attempts)"),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Commit a terminal failure, keeping whatever was transcribed so far.
    async fn fail(&self, id: &str, error: CoreError) -> Result<(), CoreError> {
        let error = error.to_string();
        self.commit(id, move |task| {
            task.status = TaskStatus::Failed;
            task.message = "failed".into();
            task.log(LogKind::Error, error.clone());
            task.error = Some(error);
        })
        .await?;
        info!(task_id = %id, "task failed");
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Lands chunk events in the task record and fans each commit out.
struct CommitSink<'a> {
    dispatcher: &'a Dispatcher,
    id: &'a str,
}

#[async_trait]
impl ChunkSink for CommitSink<'_> {
    async fn on_event(&mut self, event: ChunkEvent) -> Result<(), CoreError> {
        match event {
            ChunkEvent::Planned { total_windows } => {
                self.dispatcher
                    .commit(self.id, move |task| {
                        task.message = format!("transcribing {total_windows} windows");
                        task.log(
                            LogKind::Info,
                            format!("planned {total_windows} windows"),
                        );
                    })
                    .await?;
            }
            ChunkEvent::WindowDone {
                span,
                text,
                completed,
                total,
                progress,
            } => {
                self.dispatcher
                    .commit(self.id, move |task| {
                        task.push_segment(span.start_ms, span.end_ms, text.clone());
                        if !text.is_empty() {
                            match &mut task.result_text {
                                Some(existing) => {
                                    existing.push(' ');
                                    existing.push_str(&text);
                                }
                                None => task.result_text = Some(text),
                            }
                        }
                        task.advance_progress(progress);
                        task.message = format!("transcribed {completed}/{total} windows");
                        task.log_progress(
                            format!("transcribed window {completed}/{total}"),
                            progress,
                        );
                    })
                    .await?;
            }
            ChunkEvent::WindowRetry {
                window,
                attempt,
                error,
            } => {
                self.dispatcher
                    .commit(self.id, move |task| {
                        task.log(
                            LogKind::Warning,
                            format!("window {window} attempt {attempt} failed: {error}"),
                        );
                    })
                    .await?;
            }
            ChunkEvent::Paused { .. } => {
                self.dispatcher
                    .commit(self.id, |task| {
                        task.status = TaskStatus::Paused;
                        task.message = "paused".into();
                        task.log(LogKind::Info, "task paused");
                    })
                    .await?;
            }
            ChunkEvent::Resumed { window } => {
                self.dispatcher
                    .commit(self.id, move |task| {
                        task.status = TaskStatus::Running;
                        task.message = format!("resuming at window {window}");
                        task.log(LogKind::Info, "task resumed");
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ScriptedDecoder;
    use crate::engine::ScriptedEngine;
    use std::time::Duration;

    fn dispatcher(decoder: ScriptedDecoder, engine: ScriptedEngine) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            Arc::new(engine),
            Arc::new(decoder),
            WorkerSettings::default(),
        ))
    }

    async fn wait_until_terminal(dispatcher: &Dispatcher, id: &str) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let task = dispatcher.get(id).await.unwrap();
            if task.is_terminal() {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task never reached a terminal state: {task:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn submitted_task_runs_to_completion() {
        let dispatcher = dispatcher(ScriptedDecoder::new(75_000), ScriptedEngine::new());
        let task = dispatcher.submit("meeting.mp3").await;
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.progress, 0.0);

        let done = wait_until_terminal(&dispatcher, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 1.0);
        assert_eq!(done.segments.len(), 3);
        assert_eq!(done.segments[0].start_ms, 0);
        assert_eq!(done.segments[2].end_ms, 75_000);
        let text = done.result_text.unwrap();
        assert!(text.contains("30.0s"));
        assert!(text.contains("15.0s"));
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn decode_failure_fails_the_task() {
        let dispatcher = dispatcher(
            ScriptedDecoder::failing("unsupported container"),
            ScriptedEngine::new(),
        );
        let task = dispatcher.submit("broken.xyz").await;

        let done = wait_until_terminal(&dispatcher, &task.id).await;
        assert_eq!(done.status, TaskStatus::Failed);
        let error = done.error.unwrap();
        assert!(error.contains("unsupported container"));
        assert!(done.segments.is_empty());
        assert!(done
            .logs
            .iter()
            .any(|entry| entry.kind == LogKind::Error));
    }

    #[tokio::test]
    async fn empty_audio_fails_the_task() {
        let dispatcher = dispatcher(ScriptedDecoder::new(0), ScriptedEngine::new());
        let task = dispatcher.submit("empty.wav").await;

        let done = wait_until_terminal(&dispatcher, &task.id).await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.error.unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn exhausted_window_retries_keep_partial_segments() {
        // The first window succeeds; every attempt beyond it fails.
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(FailFromSecondCall::default()),
            Arc::new(ScriptedDecoder::new(60_000)),
            WorkerSettings::default(),
        ));
        let task = dispatcher.submit("two-windows.mp3").await;

        let done = wait_until_terminal(&dispatcher, &task.id).await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.segments.len(), 1);
        assert!(done.error.unwrap().contains("window 1"));
        let warnings = done
            .logs
            .iter()
            .filter(|entry| entry.kind == LogKind::Warning)
            .count();
        assert_eq!(warnings, CHUNK_RETRIES as usize);
    }

    #[derive(Default)]
    struct FailFromSecondCall {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl RecognitionEngine for FailFromSecondCall {
        fn transcribe(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            _language: Option<&str>,
        ) -> anyhow::Result<String> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            if call == 0 {
                Ok("only window".into())
            } else {
                anyhow::bail!("model crashed")
            }
        }
    }

    #[tokio::test]
    async fn control_requests_on_unknown_task_fail() {
        let dispatcher = dispatcher(ScriptedDecoder::new(30_000), ScriptedEngine::new());
        assert!(matches!(
            dispatcher.pause("missing").await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            dispatcher.cancel("missing").await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            dispatcher.delete("missing").await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn control_requests_on_terminal_task_are_no_ops() {
        let dispatcher = dispatcher(ScriptedDecoder::new(30_000), ScriptedEngine::new());
        let task = dispatcher.submit("short.wav").await;
        let done = wait_until_terminal(&dispatcher, &task.id).await;

        let after_pause = dispatcher.pause(&task.id).await.unwrap();
        assert_eq!(after_pause.status, TaskStatus::Completed);
        assert_eq!(after_pause.revision, done.revision);

        let after_cancel = dispatcher.cancel(&task.id).await.unwrap();
        assert_eq!(after_cancel.status, TaskStatus::Completed);
        assert_eq!(after_cancel.revision, done.revision);
    }

    #[tokio::test]
    async fn delete_removes_completed_task() {
        let dispatcher = dispatcher(ScriptedDecoder::new(30_000), ScriptedEngine::new());
        let task = dispatcher.submit("short.wav").await;
        wait_until_terminal(&dispatcher, &task.id).await;

        dispatcher.delete(&task.id).await.unwrap();
        assert!(matches!(
            dispatcher.get(&task.id).await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(dispatcher.list().await.is_empty());
    }

    #[tokio::test]
    async fn delete_stops_a_running_task() {
        let engine = ScriptedEngine::new().with_delay(Duration::from_millis(50));
        let dispatcher = dispatcher(ScriptedDecoder::new(600_000), engine);
        let task = dispatcher.submit("long.mp3").await;

        // Give the worker a moment to get going, then tear it down.
        tokio::time::sleep(Duration::from_millis(30)).await;
        dispatcher.delete(&task.id).await.unwrap();

        assert!(matches!(
            dispatcher.get(&task.id).await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn concurrency_is_clamped_to_the_pool_bounds() {
        let settings = WorkerSettings {
            concurrency: 64,
            ..WorkerSettings::default()
        };
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptedEngine::new()),
            Arc::new(ScriptedDecoder::new(1_000)),
            settings,
        );
        assert_eq!(dispatcher.settings().concurrency, 2);

        let settings = WorkerSettings {
            concurrency: 0,
            ..WorkerSettings::default()
        };
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptedEngine::new()),
            Arc::new(ScriptedDecoder::new(1_000)),
            settings,
        );
        assert_eq!(dispatcher.settings().concurrency, 1);
    }
}
