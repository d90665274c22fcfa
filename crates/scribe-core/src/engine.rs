//! Speech recognition seam.
//!
//! The worker hands each audio window to a [`RecognitionEngine`]. Engines
//! are synchronous and CPU-bound; callers run them on a blocking thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Turns one window of mono PCM into text.
pub trait RecognitionEngine: Send + Sync {
    /// Transcribe `samples` (f32 PCM at `sample_rate`).
    ///
    /// `language` is an ISO 639-1 hint; `None` lets the engine pick.
    /// Returns the recognized text, trimmed, possibly empty for silence.
    fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language: Option<&str>,
    ) -> anyhow::Result<String>;
}

/// Engine that fabricates deterministic text instead of recognizing speech.
///
/// The default when no model is configured, and the workhorse of the runtime
/// tests: output depends only on the window length, per-call latency is
/// configurable, and the first `failures` calls can be scripted to fail.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    delay: Option<Duration>,
    failures: usize,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call, simulating inference latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `failures` calls with a synthetic error.
    pub fn with_failures(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    /// Calls made so far, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language: Option<&str>,
    ) -> anyhow::Result<String> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if call < self.failures {
            anyhow::bail!("scripted failure on call {call}");
        }
        let seconds = samples.len() as f64 / f64::from(sample_rate.max(1));
        let language = language.unwrap_or("auto");
        Ok(format!(
            "[{language}] {seconds:.1}s of audio transcribed."
        ))
    }
}
