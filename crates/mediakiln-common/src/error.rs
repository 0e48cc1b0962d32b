//! Common error types used throughout mediakiln.
//!
//! Validation errors (`InvalidQuality`, `JobNotFound`) are returned
//! synchronously from the call that detects them. Encode-runtime errors
//! (`EncodeFailed`, `EncodeTimeout`) are recorded into a job's terminal
//! state and observed by polling its status, never thrown at a submitter.

/// Common error type for mediakiln.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested quality tier is not one of the known tiers.
    #[error("Invalid quality tier: {0}")]
    InvalidQuality(String),

    /// The probe collaborator could not read the source's properties.
    /// Recoverable: callers fall back to the requested tier.
    #[error("Source probe failed: {0}")]
    ProbeFailed(String),

    /// The external encode process exited abnormally.
    #[error("Encode process failed (exit code {exit_code:?}): {stderr_tail}")]
    EncodeFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// The encode process exceeded its maximum wall-clock duration.
    #[error("Encode timed out after {0:?}")]
    EncodeTimeout(std::time::Duration),

    /// A cache file could not be written or deleted.
    #[error("Cache IO error: {0}")]
    CacheIo(String),

    /// A status query referenced an unknown job id.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new InvalidQuality error.
    pub fn invalid_quality<S: Into<String>>(msg: S) -> Self {
        Self::InvalidQuality(msg.into())
    }

    /// Create a new ProbeFailed error.
    pub fn probe_failed<S: Into<String>>(msg: S) -> Self {
        Self::ProbeFailed(msg.into())
    }

    /// Create a new CacheIo error.
    pub fn cache_io<S: Into<String>>(msg: S) -> Self {
        Self::CacheIo(msg.into())
    }

    /// Create a new JobNotFound error.
    pub fn job_not_found<S: Into<String>>(msg: S) -> Self {
        Self::JobNotFound(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error belongs to the encode-runtime class that is
    /// recorded into a job's terminal state rather than propagated.
    pub fn is_encode_error(&self) -> bool {
        matches!(self, Self::EncodeFailed { .. } | Self::EncodeTimeout(_))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_quality("900p");
        assert_eq!(err.to_string(), "Invalid quality tier: 900p");

        let err = Error::probe_failed("ffprobe exited with code 1");
        assert_eq!(
            err.to_string(),
            "Source probe failed: ffprobe exited with code 1"
        );

        let err = Error::EncodeTimeout(std::time::Duration::from_secs(300));
        assert_eq!(err.to_string(), "Encode timed out after 300s");

        let err = Error::job_not_found("deadbeef");
        assert_eq!(err.to_string(), "Job not found: deadbeef");

        let err = Error::database("locked");
        assert_eq!(err.to_string(), "Database error: locked");
    }

    #[test]
    fn test_encode_failed_display() {
        let err = Error::EncodeFailed {
            exit_code: Some(1),
            stderr_tail: "unknown codec".to_string(),
        };
        assert!(err.to_string().contains("exit code Some(1)"));
        assert!(err.to_string().contains("unknown codec"));
    }

    #[test]
    fn test_is_encode_error() {
        assert!(Error::EncodeTimeout(std::time::Duration::from_secs(10)).is_encode_error());
        assert!(Error::EncodeFailed {
            exit_code: None,
            stderr_tail: String::new()
        }
        .is_encode_error());
        assert!(!Error::invalid_quality("x").is_encode_error());
        assert!(!Error::database("x").is_encode_error());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_result_type() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);

        fn error_fn() -> Result<i32> {
            Err(Error::EncodeTimeout(std::time::Duration::from_secs(5)))
        }
        assert!(error_fn().is_err());
    }
}
