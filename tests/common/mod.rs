//! Shared harness for integration tests.
//!
//! Builds a [`TranscodeService`] against a file-backed database in a
//! temp directory, with stub prober/encoder implementations plugged into
//! the trait seams so no external tools are needed.

#![allow(dead_code)]

use async_trait::async_trait;
use mediakiln::probe::{MediaProbe, MediaProber};
use mediakiln::transcode::{
    EncodeRequest, Encoder, JobStatusReport, SchedulerSettings, TranscodeService,
};
use mediakiln_common::{Error, JobId, Result};
use mediakiln_db::pool::init_pool;
use mediakiln_db::DbPool;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Prober returning a fixed probe result (or a fixed failure).
pub struct StubProber {
    probe: Option<MediaProbe>,
}

impl StubProber {
    /// Probe succeeds, reporting a video stream of the given height.
    pub fn with_height(height: u32) -> Self {
        Self {
            probe: Some(MediaProbe {
                duration_secs: Some(120.0),
                width: Some(height * 16 / 9),
                height: Some(height),
                video_codec: Some("h264".to_string()),
                audio_codec: Some("aac".to_string()),
                bit_rate: Some(4_000_000),
            }),
        }
    }

    /// Probe always fails.
    pub fn failing() -> Self {
        Self { probe: None }
    }
}

#[async_trait]
impl MediaProber for StubProber {
    async fn probe(&self, _path: &Path) -> Result<MediaProbe> {
        self.probe
            .clone()
            .ok_or_else(|| Error::probe_failed("stub probe failure"))
    }
}

/// Encoder that writes a small payload instead of transcoding, while
/// counting invocations and tracking peak concurrency.
pub struct StubEncoder {
    invocations: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl StubEncoder {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            invocations: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            delay,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Total number of encode invocations so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// The highest number of encodes observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for StubEncoder {
    async fn encode(&self, request: &EncodeRequest) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(Error::EncodeFailed {
                exit_code: Some(1),
                stderr_tail: "stub encoder: simulated failure".to_string(),
            });
        }

        std::fs::write(&request.output_path, b"stub rendition payload")?;
        Ok(())
    }
}

pub struct TestHarness {
    pub service: TranscodeService,
    pub encoder: Arc<StubEncoder>,
    pub pool: DbPool,
    // Dropped last; owns the database and cache files.
    pub data_dir: TempDir,
}

impl TestHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Default harness: 1080p source, instant successful encodes.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn cache_dir(&self) -> std::path::PathBuf {
        self.data_dir.path().join("cache")
    }
}

pub struct HarnessBuilder {
    max_concurrent: usize,
    encode_timeout: Duration,
    prober: Option<Arc<dyn MediaProber>>,
    encoder: Option<Arc<StubEncoder>>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            encode_timeout: Duration::from_secs(30),
            prober: None,
            encoder: None,
        }
    }
}

impl HarnessBuilder {
    pub fn max_concurrent(mut self, slots: usize) -> Self {
        self.max_concurrent = slots;
        self
    }

    pub fn encode_timeout(mut self, timeout: Duration) -> Self {
        self.encode_timeout = timeout;
        self
    }

    pub fn prober(mut self, prober: StubProber) -> Self {
        self.prober = Some(Arc::new(prober));
        self
    }

    pub fn encoder(mut self, encoder: StubEncoder) -> Self {
        self.encoder = Some(Arc::new(encoder));
        self
    }

    /// Must run inside a tokio runtime (the service spawns its
    /// dispatcher on construction).
    pub fn build(self) -> TestHarness {
        let data_dir = TempDir::new().unwrap();
        let db_path = data_dir.path().join("mediakiln.db");
        let pool = init_pool(&db_path.to_string_lossy()).unwrap();

        let cache_dir = data_dir.path().join("cache");
        let settings = SchedulerSettings {
            max_concurrent: self.max_concurrent,
            encode_timeout: self.encode_timeout,
            progress_interval: Duration::from_millis(20),
            temp_dir: cache_dir.join(".tmp"),
            cache_dir,
        };

        let encoder = self
            .encoder
            .unwrap_or_else(|| Arc::new(StubEncoder::new()));
        let prober = self
            .prober
            .unwrap_or_else(|| Arc::new(StubProber::with_height(1080)));

        let service = TranscodeService::new(
            pool.clone(),
            settings,
            prober,
            Arc::clone(&encoder) as Arc<dyn Encoder>,
        )
        .unwrap();

        TestHarness {
            service,
            encoder,
            pool,
            data_dir,
        }
    }
}

/// Poll a job until it reaches a terminal state.
pub async fn wait_for_terminal(service: &TranscodeService, job_id: JobId) -> JobStatusReport {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let report = service.status(job_id).unwrap();
        if report.status == "completed" || report.status == "failed" {
            return report;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not reach a terminal state",
            job_id
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
