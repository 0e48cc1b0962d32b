//! Rust models matching the database schema.
//!
//! Job state is a tagged variant rather than a bare status string plus
//! loose nullable columns: a completed job always carries its output
//! path, a failed job always carries its error. The flat columns only
//! exist at the storage boundary.

use chrono::{DateTime, Utc};
use mediakiln_common::{JobId, MediaId, QualityTier};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a transcode job.
///
/// Transitions: `Pending -> Processing -> {Completed | Failed}`.
/// Terminal states are immutable; the query layer guards every UPDATE
/// with the expected current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing {
        /// Advisory completion estimate in [0, 100]; never authoritative.
        progress: f64,
    },
    Completed {
        output_path: String,
    },
    Failed {
        error: String,
    },
}

impl JobState {
    /// The status discriminant as stored in the `status` column.
    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing { .. } => "processing",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether the job can still change state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing { .. })
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Progress to report for this state: 0 while pending, the sampled
    /// estimate while processing, 100 once completed.
    pub fn progress(&self) -> f64 {
        match self {
            Self::Pending => 0.0,
            Self::Processing { progress } => *progress,
            Self::Completed { .. } => 100.0,
            Self::Failed { .. } => 0.0,
        }
    }

    /// Reassemble a state from the flat storage columns.
    ///
    /// A `completed` row without an output path or a `failed` row without
    /// an error message means the columns were mutated outside this crate;
    /// both are rejected rather than guessed at.
    pub fn from_columns(
        status: &str,
        progress: f64,
        output_path: Option<String>,
        error_message: Option<String>,
    ) -> Result<Self, String> {
        match status {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing { progress }),
            "completed" => output_path
                .map(|output_path| Self::Completed { output_path })
                .ok_or_else(|| "completed job row has no output_path".to_string()),
            "failed" => error_message
                .map(|error| Self::Failed { error })
                .ok_or_else(|| "failed job row has no error_message".to_string()),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A transcode job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub id: JobId,
    pub media_id: MediaId,
    pub input_path: String,
    pub requested_quality: QualityTier,
    pub resolved_quality: QualityTier,
    #[serde(flatten)]
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TranscodeJob {
    /// Output path if the job completed.
    pub fn output_path(&self) -> Option<&str> {
        match &self.state {
            JobState::Completed { output_path } => Some(output_path),
            _ => None,
        }
    }

    /// Error message if the job failed.
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// A cached rendition row: one finished output per (media, quality).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRendition {
    pub media_id: MediaId,
    pub quality: QualityTier,
    pub output_path: String,
    pub file_size: i64,
    pub duration_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}
