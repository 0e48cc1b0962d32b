//! Worker execution of a single transcode job.
//!
//! A worker owns its job end to end: the processing transition, the
//! encode invocation against a temporary file, advisory progress
//! sampling, the wall-clock timeout, and the atomic publish of the
//! finished rendition. Every exit path lands the job in a terminal
//! state; the caller releases the coalescing key afterwards.

use crate::transcode::encoder::EncodeRequest;
use crate::transcode::scheduler::ServiceInner;
use mediakiln_common::{Error, JobId, MediaId, QualityTier, Result};
use mediakiln_db::get_conn;
use mediakiln_db::queries::transcode_jobs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A queued unit of work handed from the dispatcher to a worker.
#[derive(Debug)]
pub(crate) struct EncodeJob {
    pub id: JobId,
    pub media_id: MediaId,
    pub input_path: PathBuf,
    pub quality: QualityTier,
    /// Source duration from the submit-time probe, if known. Drives the
    /// advisory progress estimate and the published rendition's duration.
    pub duration_hint: Option<f64>,
}

/// Execute one job to a terminal state.
pub(crate) async fn run_job(inner: &ServiceInner, job: EncodeJob) {
    {
        let conn = match get_conn(&inner.pool) {
            Ok(conn) => conn,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "cannot reach database; job left pending");
                return;
            }
        };
        if let Err(e) = transcode_jobs::start_job(&conn, job.id) {
            // Already failed (e.g. queue shutdown); nothing to run.
            warn!(job_id = %job.id, error = %e, "job not startable");
            return;
        }
    }

    info!(
        job_id = %job.id,
        media_id = %job.media_id,
        quality = %job.quality,
        input = %job.input_path.display(),
        "transcode started"
    );

    match execute(inner, &job).await {
        Ok(output_path) => match get_conn(&inner.pool) {
            Ok(conn) => {
                if let Err(e) =
                    transcode_jobs::complete_job(&conn, job.id, &output_path.to_string_lossy())
                {
                    error!(job_id = %job.id, error = %e, "failed to record job completion");
                } else {
                    info!(
                        job_id = %job.id,
                        output = %output_path.display(),
                        "transcode completed"
                    );
                }
            }
            Err(e) => error!(job_id = %job.id, error = %e, "failed to record job completion"),
        },
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "transcode failed");
            match get_conn(&inner.pool) {
                Ok(conn) => {
                    if let Err(db_err) = transcode_jobs::fail_job(&conn, job.id, &e.to_string()) {
                        error!(job_id = %job.id, error = %db_err, "failed to record job failure");
                    }
                }
                Err(db_err) => {
                    error!(job_id = %job.id, error = %db_err, "failed to record job failure")
                }
            }
        }
    }
}

/// Run the encode and publish its output. Any error leaves no trace in
/// the cache: the temp file is deleted on drop and rows are only written
/// after the rename.
async fn execute(inner: &ServiceInner, job: &EncodeJob) -> Result<PathBuf> {
    let settings = &inner.settings;

    let temp = tempfile::Builder::new()
        .prefix(&format!("job-{}-", job.id))
        .suffix(".mp4")
        .tempfile_in(&settings.temp_dir)?;

    let request = EncodeRequest {
        input_path: job.input_path.clone(),
        output_path: temp.path().to_path_buf(),
        params: job.quality.params(),
    };

    let started = tokio::time::Instant::now();
    let deadline = started + settings.encode_timeout;

    let result = {
        let encode = inner.encoder.encode(&request);
        tokio::pin!(encode);
        let mut ticker = tokio::time::interval(settings.progress_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_progress = 0.0_f64;

        loop {
            tokio::select! {
                result = &mut encode => break result,
                _ = tokio::time::sleep_until(deadline) => {
                    break Err(Error::EncodeTimeout(settings.encode_timeout));
                }
                _ = ticker.tick() => {
                    let estimate = estimate_progress(started.elapsed(), job.duration_hint);
                    if estimate > last_progress {
                        last_progress = estimate;
                        report_progress(inner, job.id, estimate);
                    }
                }
            }
        }
        // The encode future is dropped here; on timeout that terminates
        // the external process (encoders are cancel-safe by contract).
    };

    result?;

    let metadata = std::fs::metadata(temp.path()).map_err(|_| Error::EncodeFailed {
        exit_code: None,
        stderr_tail: "encoder reported success but produced no output".to_string(),
    })?;
    let file_size = metadata.len() as i64;

    // Rename into the cache location, then register the row. A
    // partially-written file is never visible under the final path.
    let output_path = inner.store.rendition_path(job.media_id, job.quality);
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    temp.persist(&output_path)
        .map_err(|e| Error::cache_io(format!("failed to publish rendition: {}", e)))?;

    let conn = get_conn(&inner.pool)?;
    inner.store.publish(
        &conn,
        job.media_id,
        job.quality,
        &output_path,
        file_size,
        job.duration_hint,
    )?;

    Ok(output_path)
}

/// Advisory completion estimate, monotone in elapsed time and capped
/// below 100. With a known source duration the encode is assumed to run
/// at roughly realtime; without one the estimate just creeps upward.
/// Either way it is UI feedback, never a correctness signal.
fn estimate_progress(elapsed: Duration, source_duration_secs: Option<f64>) -> f64 {
    let elapsed = elapsed.as_secs_f64();
    match source_duration_secs {
        Some(duration) if duration > 0.0 => (elapsed / duration * 100.0).min(95.0),
        _ => (elapsed / (elapsed + 60.0) * 100.0).min(90.0),
    }
}

fn report_progress(inner: &ServiceInner, job_id: JobId, progress: f64) {
    let result = get_conn(&inner.pool)
        .and_then(|conn| transcode_jobs::update_progress(&conn, job_id, progress));
    if let Err(e) = result {
        debug!(%job_id, error = %e, "progress update skipped");
    }
}
