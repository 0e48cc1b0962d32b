//! Media probing.
//!
//! The probe collaborator extracts a source's properties (duration,
//! resolution, codecs, bitrate) so the quality negotiator can cap the
//! target tier. Production probing shells out to ffprobe; the trait seam
//! exists so the scheduler can be exercised without external tools.

use async_trait::async_trait;
use mediakiln_common::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Probed properties of a source media file.
///
/// Every field is optional: audio-only files have no video stream, and
/// containers routinely omit bitrate metadata. Consumers treat missing
/// data as "unknown", not as an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaProbe {
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub bit_rate: Option<i64>,
}

/// Extracts media properties from a file on disk.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaProbe>;
}

/// Production prober backed by the ffprobe binary.
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Locate ffprobe on PATH.
    pub fn discover() -> Result<Self> {
        let path = which::which("ffprobe")
            .map_err(|_| Error::probe_failed("ffprobe not found on PATH"))?;
        Ok(Self::new(path))
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaProbe> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| Error::probe_failed(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(Error::probe_failed(format!(
                "ffprobe exited with {} for {}",
                output.status,
                path.display()
            )));
        }

        parse_ffprobe_output(&output.stdout)
    }
}

/// Parse ffprobe's JSON report into a [`MediaProbe`].
///
/// ffprobe reports numeric fields inconsistently (duration and bit_rate
/// arrive as strings), so everything goes through lenient extraction.
fn parse_ffprobe_output(stdout: &[u8]) -> Result<MediaProbe> {
    let report: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| Error::probe_failed(format!("unparseable ffprobe output: {}", e)))?;

    let format = &report["format"];
    let mut probe = MediaProbe {
        duration_secs: format["duration"].as_str().and_then(|s| s.parse().ok()),
        bit_rate: format["bit_rate"].as_str().and_then(|s| s.parse().ok()),
        ..Default::default()
    };

    if let Some(streams) = report["streams"].as_array() {
        for stream in streams {
            match stream["codec_type"].as_str() {
                Some("video") if probe.video_codec.is_none() => {
                    probe.video_codec = stream["codec_name"].as_str().map(String::from);
                    probe.width = stream["width"].as_u64().map(|w| w as u32);
                    probe.height = stream["height"].as_u64().map(|h| h as u32);
                }
                Some("audio") if probe.audio_codec.is_none() => {
                    probe.audio_codec = stream["codec_name"].as_str().map(String::from);
                }
                _ => {}
            }
        }
    }

    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REPORT: &str = r#"{
        "streams": [
            {
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1280,
                "height": 720
            },
            {
                "codec_type": "audio",
                "codec_name": "aac",
                "channels": 2
            },
            {
                "codec_type": "audio",
                "codec_name": "ac3",
                "channels": 6
            }
        ],
        "format": {
            "duration": "5400.040000",
            "size": "1073741824",
            "bit_rate": "1590964"
        }
    }"#;

    #[test]
    fn test_parse_full_report() {
        let probe = parse_ffprobe_output(SAMPLE_REPORT.as_bytes()).unwrap();
        assert_eq!(probe.duration_secs, Some(5400.04));
        assert_eq!(probe.width, Some(1280));
        assert_eq!(probe.height, Some(720));
        assert_eq!(probe.video_codec.as_deref(), Some("h264"));
        // First audio stream wins.
        assert_eq!(probe.audio_codec.as_deref(), Some("aac"));
        assert_eq!(probe.bit_rate, Some(1590964));
    }

    #[test]
    fn test_parse_audio_only() {
        let report = r#"{
            "streams": [{"codec_type": "audio", "codec_name": "flac"}],
            "format": {"duration": "247.1"}
        }"#;
        let probe = parse_ffprobe_output(report.as_bytes()).unwrap();
        assert_eq!(probe.height, None);
        assert_eq!(probe.video_codec, None);
        assert_eq!(probe.audio_codec.as_deref(), Some("flac"));
        assert_eq!(probe.duration_secs, Some(247.1));
    }

    #[test]
    fn test_parse_empty_report() {
        let probe = parse_ffprobe_output(b"{}").unwrap();
        assert_eq!(probe, MediaProbe::default());
    }

    #[test]
    fn test_parse_garbage_fails() {
        let err = parse_ffprobe_output(b"not json").unwrap_err();
        assert!(matches!(err, Error::ProbeFailed(_)));
    }
}
