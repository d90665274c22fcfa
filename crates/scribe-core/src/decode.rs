//! Audio decoding.
//!
//! Workers decode the whole source up front into 16 kHz mono f32 PCM and
//! window it from memory. [`FfmpegDecoder`] shells out to ffmpeg;
//! [`ScriptedDecoder`] fabricates silence for tests and demos.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytemuck::cast_slice;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

/// Output sample rate for every decoder.
pub const DECODE_SAMPLE_RATE: u32 = 16_000;

/// Ceiling on a single ffmpeg run.
const FFMPEG_TIMEOUT: Duration = Duration::from_secs(300);

/// Fully decoded source audio.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono f32 PCM, shared so windows can borrow slices across threads.
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub duration_ms: u64,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration_ms = samples.len() as u64 * 1000 / u64::from(sample_rate.max(1));
        Self {
            samples: Arc::from(samples.as_slice()),
            sample_rate,
            duration_ms,
        }
    }
}

/// Produces [`DecodedAudio`] from a task's source path.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, source: &str) -> anyhow::Result<DecodedAudio>;
}

/// Decoder that spawns ffmpeg and streams PCM from its stdout.
///
/// Container and codec detection stay ffmpeg's problem; anything it can
/// read becomes 16 kHz mono f32.
#[derive(Debug, Default)]
pub struct FfmpegDecoder;

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioDecoder for FfmpegDecoder {
    async fn decode(&self, source: &str) -> anyhow::Result<DecodedAudio> {
        if !std::path::Path::new(source).exists() {
            bail!("audio file not found: {source}");
        }

        debug!(path = %source, "starting ffmpeg conversion to 16 kHz mono f32");

        // -vn drops any video stream; raw f32le samples go to stdout.
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-i")
            .arg(source)
            .args(["-vn", "-f", "f32le", "-acodec", "pcm_f32le"])
            .args(["-ar", "16000", "-ac", "1"])
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .context("failed to start ffmpeg; is it installed and in PATH?")?;

        let mut stdout = child
            .stdout
            .take()
            .context("ffmpeg stdout not available")?;
        let stderr = child
            .stderr
            .take()
            .context("ffmpeg stderr not available")?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(ffmpeg_stderr = %line, "ffmpeg log");
            }
        });

        // Stream stdout in chunks rather than waiting on the whole output.
        let pcm_result = timeout(FFMPEG_TIMEOUT, async {
            let mut pcm_bytes = Vec::new();
            let mut buffer = vec![0u8; 8192];
            loop {
                let n = stdout
                    .read(&mut buffer)
                    .await
                    .context("failed to read ffmpeg stdout")?;
                if n == 0 {
                    break;
                }
                pcm_bytes.extend_from_slice(&buffer[..n]);
            }
            Ok::<Vec<u8>, anyhow::Error>(pcm_bytes)
        })
        .await;

        let _ = stderr_task.await;

        let status = timeout(Duration::from_secs(5), child.wait())
            .await
            .context("timed out waiting for ffmpeg to exit")?
            .context("failed to wait for ffmpeg")?;
        if !status.success() {
            bail!(
                "ffmpeg exited with status {} for {source}",
                status.code().unwrap_or(-1)
            );
        }

        let pcm_bytes = pcm_result.context("ffmpeg conversion timed out")??;

        if pcm_bytes.is_empty() {
            bail!("ffmpeg produced no audio for {source}; corrupted or unsupported format?");
        }
        if pcm_bytes.len() % std::mem::size_of::<f32>() != 0 {
            bail!(
                "ffmpeg output misaligned: {} bytes is not a whole number of f32 samples",
                pcm_bytes.len()
            );
        }

        let samples: Vec<f32> = cast_slice::<u8, f32>(&pcm_bytes).to_vec();
        let decoded = DecodedAudio::new(samples, DECODE_SAMPLE_RATE);
        debug!(
            path = %source,
            samples = decoded.samples.len(),
            duration_ms = decoded.duration_ms,
            "ffmpeg conversion completed"
        );
        Ok(decoded)
    }
}

/// Decoder that returns silence of a fixed duration, or a scripted failure.
#[derive(Debug, Clone)]
pub struct ScriptedDecoder {
    duration_ms: u64,
    fail: Option<String>,
}

impl ScriptedDecoder {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            fail: None,
        }
    }

    /// Fail every decode with this message instead of producing audio.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            duration_ms: 0,
            fail: Some(message.into()),
        }
    }
}

#[async_trait]
impl AudioDecoder for ScriptedDecoder {
    async fn decode(&self, source: &str) -> anyhow::Result<DecodedAudio> {
        if let Some(message) = &self.fail {
            bail!("{message}: {source}");
        }
        let count = (self.duration_ms * u64::from(DECODE_SAMPLE_RATE) / 1000) as usize;
        Ok(DecodedAudio::new(
            vec![0.0f32; count],
            DECODE_SAMPLE_RATE,
        ))
    }
}
