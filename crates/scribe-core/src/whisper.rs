//! Whisper-backed [`RecognitionEngine`].
//!
//! Requires the `whisper` feature (and cmake at build time). Without it the
//! runtime falls back to [`ScriptedEngine`].
//!
//! [`ScriptedEngine`]: crate::engine::ScriptedEngine

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context};
use whisper_rs::{
    install_logging_hooks, FullParams, SamplingStrategy, WhisperContext,
    WhisperContextParameters,
};

use crate::engine::RecognitionEngine;

/// Sample rate whisper.cpp models are trained on.
const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Recognition engine backed by a ggml whisper model.
///
/// The loaded context is shared; each call creates its own inference state,
/// serialized through a mutex so concurrent windows do not oversubscribe the
/// CPU.
pub struct WhisperEngine {
    context: Mutex<WhisperContext>,
    model_name: String,
    threads: Option<usize>,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("model_name", &self.model_name)
            .field("threads", &self.threads)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

impl WhisperEngine {
    /// Load a ggml model from disk.
    pub fn load(model_path: &Path, threads: Option<usize>) -> anyhow::Result<Self> {
        // Routes whisper.cpp/GGML logs into tracing; idempotent.
        install_logging_hooks();

        if !model_path.exists() {
            bail!("whisper model not found at {}", model_path.display());
        }

        let model_name = model_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("unknown")
            .to_owned();

        let mut context_params = WhisperContextParameters::default();
        // Fused attention kernels; the standalone softmax kernel crashes on
        // recent CUDA GPUs.
        context_params.flash_attn(true);
        let path = model_path
            .to_str()
            .ok_or_else(|| anyhow!("model path is not valid UTF-8: {}", model_path.display()))?;
        let context = WhisperContext::new_with_params(path, context_params)
            .with_context(|| format!("failed to load whisper model {model_name}"))?;

        Ok(Self {
            context: Mutex::new(context),
            model_name,
            threads,
        })
    }

    /// Stem of the loaded model file, e.g. `ggml-base`.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl RecognitionEngine for WhisperEngine {
    fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language: Option<&str>,
    ) -> anyhow::Result<String> {
        if sample_rate != WHISPER_SAMPLE_RATE {
            bail!("whisper expects {WHISPER_SAMPLE_RATE} Hz audio, got {sample_rate} Hz");
        }

        let context = self
            .context
            .lock()
            .map_err(|_| anyhow!("whisper context lock poisoned"))?;
        let mut state = context
            .create_state()
            .context("failed to create whisper state")?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(language);
        if let Some(threads) = self.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, samples)
            .context("whisper inference failed")?;

        let mut text = String::new();
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
        }
        Ok(text.trim().to_owned())
    }
}
