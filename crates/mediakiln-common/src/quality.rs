//! The quality-tier ladder and its encode parameters.
//!
//! Tiers form a fixed total order from 240p up to 4k. Each tier is bound
//! to static encode parameters; nothing here is mutated at runtime.

use serde::{Deserialize, Serialize};

/// A named resolution/bitrate profile for a rendition.
///
/// The derived `Ord` follows declaration order, so `Q240 < Q360 < ... <
/// Q2160` and tier comparison is resolution comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    #[serde(rename = "240p")]
    Q240,
    #[serde(rename = "360p")]
    Q360,
    #[serde(rename = "480p")]
    Q480,
    #[serde(rename = "720p")]
    Q720,
    #[serde(rename = "1080p")]
    Q1080,
    #[serde(rename = "4k")]
    Q2160,
}

/// Static encode parameters for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    /// Target video bitrate, in ffmpeg notation (e.g. "2500k").
    pub video_bitrate: &'static str,
    /// Target audio bitrate.
    pub audio_bitrate: &'static str,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Constant rate factor (quality knob; lower is better).
    pub crf: u32,
}

impl EncodeParams {
    /// Resolution formatted for an encoder size argument ("WxH").
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl QualityTier {
    /// All tiers in ascending order.
    pub const ALL: [QualityTier; 6] = [
        Self::Q240,
        Self::Q360,
        Self::Q480,
        Self::Q720,
        Self::Q1080,
        Self::Q2160,
    ];

    /// The encode parameters bound to this tier.
    pub fn params(self) -> &'static EncodeParams {
        match self {
            Self::Q240 => &EncodeParams {
                video_bitrate: "500k",
                audio_bitrate: "64k",
                width: 426,
                height: 240,
                crf: 28,
            },
            Self::Q360 => &EncodeParams {
                video_bitrate: "800k",
                audio_bitrate: "96k",
                width: 640,
                height: 360,
                crf: 26,
            },
            Self::Q480 => &EncodeParams {
                video_bitrate: "1200k",
                audio_bitrate: "128k",
                width: 854,
                height: 480,
                crf: 24,
            },
            Self::Q720 => &EncodeParams {
                video_bitrate: "2500k",
                audio_bitrate: "192k",
                width: 1280,
                height: 720,
                crf: 22,
            },
            Self::Q1080 => &EncodeParams {
                video_bitrate: "5000k",
                audio_bitrate: "256k",
                width: 1920,
                height: 1080,
                crf: 20,
            },
            Self::Q2160 => &EncodeParams {
                video_bitrate: "15000k",
                audio_bitrate: "320k",
                width: 3840,
                height: 2160,
                crf: 18,
            },
        }
    }

    /// The highest tier a source of the given height can meaningfully
    /// produce. Anything above it would be an upscale.
    pub fn for_source_height(height: u32) -> Self {
        if height <= 240 {
            Self::Q240
        } else if height <= 360 {
            Self::Q360
        } else if height <= 480 {
            Self::Q480
        } else if height <= 720 {
            Self::Q720
        } else if height <= 1080 {
            Self::Q1080
        } else {
            Self::Q2160
        }
    }

    /// The tier's external name ("720p", "4k", ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Q240 => "240p",
            Self::Q360 => "360p",
            Self::Q480 => "480p",
            Self::Q720 => "720p",
            Self::Q1080 => "1080p",
            Self::Q2160 => "4k",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "240p" => Ok(Self::Q240),
            "360p" => Ok(Self::Q360),
            "480p" => Ok(Self::Q480),
            "720p" => Ok(Self::Q720),
            "1080p" => Ok(Self::Q1080),
            "4k" | "2160p" => Ok(Self::Q2160),
            _ => Err(format!("unknown quality tier: {}", s)),
        }
    }
}
