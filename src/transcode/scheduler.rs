//! Job scheduling: submission, coalescing, and bounded dispatch.
//!
//! `submit` resolves the target tier, then decides under one lock whether
//! the request is already satisfied (cache hit), already in flight
//! (coalesce), or new work (enqueue). A dispatcher task feeds queued jobs
//! to workers, holding admission to at most `max_concurrent` running
//! encodes via a semaphore; queued jobs beyond that wait in FIFO order.

use crate::probe::MediaProber;
use crate::transcode::encoder::Encoder;
use crate::transcode::negotiator::resolve_quality;
use crate::transcode::store::RenditionStore;
use crate::transcode::worker::{self, EncodeJob};
use chrono::{DateTime, Utc};
use mediakiln_common::{Error, JobId, MediaId, QualityTier, Result};
use mediakiln_db::models::TranscodeJob;
use mediakiln_db::queries::transcode_jobs;
use mediakiln_db::{get_conn, DbPool};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Tunables for the scheduler and its workers.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Worker slots: the maximum number of concurrently running encodes.
    pub max_concurrent: usize,
    /// Wall-clock ceiling for one encode; exceeding it fails the job.
    pub encode_timeout: Duration,
    /// How often a worker samples advisory progress.
    pub progress_interval: Duration,
    /// Directory for finished renditions.
    pub cache_dir: PathBuf,
    /// Directory for in-flight encoder output. Must live on the same
    /// filesystem as `cache_dir` so publishing is an atomic rename.
    pub temp_dir: PathBuf,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let cache_dir = PathBuf::from("/tmp/mediakiln/cache");
        Self {
            max_concurrent: 2,
            encode_timeout: Duration::from_secs(2 * 3600),
            progress_interval: Duration::from_secs(2),
            temp_dir: cache_dir.join(".tmp"),
            cache_dir,
        }
    }
}

/// Caller-facing view of one job's lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<TranscodeJob> for JobStatusReport {
    fn from(job: TranscodeJob) -> Self {
        Self {
            job_id: job.id,
            status: job.state.status_str().to_string(),
            progress: job.state.progress(),
            error_message: job.error_message().map(String::from),
            output_path: job.output_path().map(String::from),
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

pub(crate) struct ServiceInner {
    pub(crate) pool: DbPool,
    pub(crate) store: Arc<RenditionStore>,
    pub(crate) prober: Arc<dyn MediaProber>,
    pub(crate) encoder: Arc<dyn Encoder>,
    pub(crate) settings: SchedulerSettings,
    /// Active (pending/processing) job per (media, tier) key. All
    /// coalescing decisions and key releases go through this one lock;
    /// it is the subsystem's critical section.
    pub(crate) active: Mutex<HashMap<(MediaId, QualityTier), JobId>>,
    queue_tx: mpsc::UnboundedSender<EncodeJob>,
}

/// The transcoding front door: accepts requests, tracks jobs, serves
/// cached renditions.
#[derive(Clone)]
pub struct TranscodeService {
    inner: Arc<ServiceInner>,
}

impl TranscodeService {
    /// Build the service and start its dispatcher.
    ///
    /// Jobs left active by a previous process are failed first: their
    /// workers are gone, and a live row would absorb coalesced submits
    /// forever.
    pub fn new(
        pool: DbPool,
        settings: SchedulerSettings,
        prober: Arc<dyn MediaProber>,
        encoder: Arc<dyn Encoder>,
    ) -> Result<Self> {
        {
            let conn = get_conn(&pool)?;
            let reset = transcode_jobs::reset_orphaned_jobs(&conn)?;
            if reset > 0 {
                warn!(count = reset, "failed orphaned jobs from previous session");
            }
        }

        std::fs::create_dir_all(&settings.cache_dir)?;
        std::fs::create_dir_all(&settings.temp_dir)?;

        let store = Arc::new(RenditionStore::new(settings.cache_dir.clone()));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ServiceInner {
            pool,
            store,
            prober,
            encoder,
            settings,
            active: Mutex::new(HashMap::new()),
            queue_tx,
        });

        tokio::spawn(dispatch_loop(Arc::clone(&inner), queue_rx));

        Ok(Self { inner })
    }

    /// The rendition store (shared with the janitor).
    pub fn store(&self) -> Arc<RenditionStore> {
        Arc::clone(&self.inner.store)
    }

    /// Submit a transcode request. Never waits for encode work.
    ///
    /// Returns a job id in all three shapes the request can take: a
    /// synthesized completed job on a cache hit, the in-flight job's id
    /// when an identical request is already active, or a fresh pending
    /// job that has been queued. Only tier validation fails here; encode
    /// failures surface later through [`status`](Self::status).
    pub async fn submit(
        &self,
        media_id: MediaId,
        input_path: &Path,
        requested_quality: &str,
    ) -> Result<JobId> {
        let requested: QualityTier = requested_quality
            .parse()
            .map_err(|_| Error::invalid_quality(requested_quality))?;

        let probe = match self.inner.prober.probe(input_path).await {
            Ok(probe) => Some(probe),
            Err(e) => {
                warn!(
                    input = %input_path.display(),
                    error = %e,
                    "probe failed; resolving to requested tier"
                );
                None
            }
        };
        let resolved = resolve_quality(requested, probe.as_ref());
        let duration_hint = probe.as_ref().and_then(|p| p.duration_secs);

        let inner = &self.inner;
        let input = input_path.to_string_lossy();
        let conn = get_conn(&inner.pool)?;
        let key = (media_id, resolved);

        let mut active = inner.active.lock();

        // 1. Already cached: hand back a completed job, no new work.
        if let Some(rendition) = inner.store.lookup(&conn, media_id, resolved)? {
            let job = transcode_jobs::insert_completed_job(
                &conn,
                media_id,
                &input,
                requested,
                resolved,
                &rendition.output_path,
            )?;
            debug!(%media_id, quality = %resolved, job_id = %job.id, "cache hit");
            return Ok(job.id);
        }

        // 2. Identical request in flight: coalesce onto it.
        if let Some(&existing) = active.get(&key) {
            debug!(%media_id, quality = %resolved, job_id = %existing, "coalesced submit");
            return Ok(existing);
        }
        // A job owned by another process counts too: CLI invocations
        // share one database, and its owner will publish the result.
        if let Some(job) = transcode_jobs::get_active_job_for_key(&conn, media_id, resolved)? {
            debug!(%media_id, quality = %resolved, job_id = %job.id, "coalesced onto external job");
            return Ok(job.id);
        }

        // 3. New work: record it, claim the key, enqueue.
        let job = transcode_jobs::create_job(&conn, media_id, &input, requested, resolved)?;
        active.insert(key, job.id);

        let queued = EncodeJob {
            id: job.id,
            media_id,
            input_path: input_path.to_path_buf(),
            quality: resolved,
            duration_hint,
        };
        if inner.queue_tx.send(queued).is_err() {
            // Dispatcher is gone; don't leave a job that can never run.
            active.remove(&key);
            transcode_jobs::fail_job(&conn, job.id, "transcode queue is shut down")?;
            return Err(Error::internal("transcode queue is shut down"));
        }

        info!(
            %media_id,
            requested = %requested,
            resolved = %resolved,
            job_id = %job.id,
            "queued transcode job"
        );
        Ok(job.id)
    }

    /// Current lifecycle state of a job.
    pub fn status(&self, job_id: JobId) -> Result<JobStatusReport> {
        let conn = get_conn(&self.inner.pool)?;
        let job = transcode_jobs::get_job(&conn, job_id)?;
        Ok(job.into())
    }

    /// Path of the cached rendition for (media, quality), if one exists
    /// on disk right now.
    pub fn cached_path(
        &self,
        media_id: MediaId,
        quality: QualityTier,
    ) -> Result<Option<PathBuf>> {
        let conn = get_conn(&self.inner.pool)?;
        Ok(self
            .inner
            .store
            .lookup(&conn, media_id, quality)?
            .map(|r| PathBuf::from(r.output_path)))
    }

    /// Tiers with a usable cached rendition for a media item.
    pub fn available_qualities(&self, media_id: MediaId) -> Result<Vec<QualityTier>> {
        let conn = get_conn(&self.inner.pool)?;
        self.inner.store.available_qualities(&conn, media_id)
    }

    /// Manually run the janitor's eviction logic once.
    pub fn purge_older_than(&self, ttl: Duration) -> Result<usize> {
        let conn = get_conn(&self.inner.pool)?;
        self.inner.store.evict_older_than(&conn, ttl)
    }

    /// Drop terminal job records older than `age`.
    pub fn prune_jobs_older_than(&self, age: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        let conn = get_conn(&self.inner.pool)?;
        transcode_jobs::prune_terminal_jobs(&conn, Utc::now() - age)
    }
}

/// Feed queued jobs to workers, one semaphore permit per running encode.
///
/// Acquiring the permit *before* spawning keeps admission strictly FIFO:
/// the next job is not even dequeued until a slot frees up.
async fn dispatch_loop(
    inner: Arc<ServiceInner>,
    mut queue_rx: mpsc::UnboundedReceiver<EncodeJob>,
) {
    let slots = Arc::new(Semaphore::new(inner.settings.max_concurrent));
    info!(
        slots = inner.settings.max_concurrent,
        "transcode dispatcher started"
    );

    while let Some(job) = queue_rx.recv().await {
        let permit = match Arc::clone(&slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let key = (job.media_id, job.quality);
            worker::run_job(&inner, job).await;
            // The terminal row (and the cache publish, on success) are
            // already visible before the key is released, so a submit
            // serialized after this sees either the cache hit or no
            // active job. A duplicate encode can never start while one
            // is still running.
            inner.active.lock().remove(&key);
            drop(permit);
        });
    }

    info!("transcode dispatcher stopped");
}
