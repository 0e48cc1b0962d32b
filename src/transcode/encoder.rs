//! The external encoder collaborator.
//!
//! An [`Encoder`] turns one input file into one output file at fixed
//! parameters and reports nothing but success or a diagnostic failure.
//! Production encoding shells out to ffmpeg; tests substitute stubs
//! through the trait.

use async_trait::async_trait;
use mediakiln_common::{EncodeParams, Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// How many trailing stderr lines are kept as the failure diagnostic.
const STDERR_TAIL_LINES: usize = 15;

/// One encode invocation: input, output, and the tier's fixed parameters.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub params: &'static EncodeParams,
}

/// Executes one encode end to end.
///
/// Implementations must be cancel-safe: dropping the returned future has
/// to terminate any external process it started, since the worker
/// enforces its wall-clock timeout by dropping the future.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, request: &EncodeRequest) -> Result<()>;
}

/// Production encoder backed by the ffmpeg binary.
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
    preset: String,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, preset: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            preset: preset.into(),
        }
    }

    /// Locate ffmpeg on PATH.
    pub fn discover(preset: impl Into<String>) -> Result<Self> {
        let path = which::which("ffmpeg")
            .map_err(|_| Error::internal("ffmpeg not found on PATH"))?;
        Ok(Self::new(path, preset))
    }

    fn build_args(&self, request: &EncodeRequest) -> Vec<String> {
        let params = request.params;
        vec![
            "-i".to_string(),
            request.input_path.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:v".to_string(),
            params.video_bitrate.to_string(),
            "-b:a".to_string(),
            params.audio_bitrate.to_string(),
            "-s".to_string(),
            params.resolution(),
            "-crf".to_string(),
            params.crf.to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-y".to_string(),
            request.output_path.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, request: &EncodeRequest) -> Result<()> {
        let args = self.build_args(request);
        debug!(ffmpeg = %self.ffmpeg_path.display(), ?args, "starting encode");

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::EncodeFailed {
                exit_code: None,
                stderr_tail: format!("failed to spawn ffmpeg: {}", e),
            })?;

        if !output.status.success() {
            return Err(Error::EncodeFailed {
                exit_code: output.status.code(),
                stderr_tail: stderr_tail(&output.stderr, STDERR_TAIL_LINES),
            });
        }

        Ok(())
    }
}

/// Keep the last `max_lines` lines of a process's error stream.
fn stderr_tail(stderr: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
