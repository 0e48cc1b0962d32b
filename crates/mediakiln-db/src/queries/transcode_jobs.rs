//! Transcode job query operations.
//!
//! The `transcode_jobs` table is a durable state machine per job:
//! `pending -> processing -> {completed | failed}`. Every transition is
//! guarded by the expected current status in its WHERE clause, so no
//! UPDATE can move a job out of a terminal state.

use chrono::{DateTime, Utc};
use mediakiln_common::{Error, JobId, MediaId, QualityTier, Result};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::models::{JobState, TranscodeJob};

const JOB_COLUMNS: &str = "id, media_id, input_path, requested_quality, resolved_quality, \
     status, progress, output_path, error_message, created_at, started_at, completed_at";

fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscodeJob> {
    let conversion = |idx: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
    };

    let id = Uuid::parse_str(&row.get::<_, String>(0)?)
        .map_err(|e| conversion(0, e.to_string()))?;
    let media_id = Uuid::parse_str(&row.get::<_, String>(1)?)
        .map_err(|e| conversion(1, e.to_string()))?;
    let requested_quality: QualityTier = row
        .get::<_, String>(3)?
        .parse()
        .map_err(|e: String| conversion(3, e))?;
    let resolved_quality: QualityTier = row
        .get::<_, String>(4)?
        .parse()
        .map_err(|e: String| conversion(4, e))?;

    let state = JobState::from_columns(
        &row.get::<_, String>(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    )
    .map_err(|e| conversion(5, e))?;

    Ok(TranscodeJob {
        id: JobId::from(id),
        media_id: MediaId::from(media_id),
        input_path: row.get(2)?,
        requested_quality,
        resolved_quality,
        state,
        created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(9)?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        started_at: row
            .get::<_, Option<String>>(10)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        completed_at: row
            .get::<_, Option<String>>(11)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

/// Create a new pending transcode job.
pub fn create_job(
    conn: &Connection,
    media_id: MediaId,
    input_path: &str,
    requested_quality: QualityTier,
    resolved_quality: QualityTier,
) -> Result<TranscodeJob> {
    let id = JobId::new();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO transcode_jobs
         (id, media_id, input_path, requested_quality, resolved_quality, status, progress, created_at)
         VALUES (?, ?, ?, ?, ?, 'pending', 0, ?)",
        params![
            id.to_string(),
            media_id.to_string(),
            input_path,
            requested_quality.as_str(),
            resolved_quality.as_str(),
            now.to_rfc3339(),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(TranscodeJob {
        id,
        media_id,
        input_path: input_path.to_string(),
        requested_quality,
        resolved_quality,
        state: JobState::Pending,
        created_at: now,
        started_at: None,
        completed_at: None,
    })
}

/// Record a job that is already satisfied by a cached rendition.
///
/// Created directly in the completed state so the caller gets a job id
/// with the usual polling contract without any work being enqueued.
pub fn insert_completed_job(
    conn: &Connection,
    media_id: MediaId,
    input_path: &str,
    requested_quality: QualityTier,
    resolved_quality: QualityTier,
    output_path: &str,
) -> Result<TranscodeJob> {
    let id = JobId::new();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO transcode_jobs
         (id, media_id, input_path, requested_quality, resolved_quality,
          status, progress, output_path, created_at, completed_at)
         VALUES (?, ?, ?, ?, ?, 'completed', 100, ?, ?, ?)",
        params![
            id.to_string(),
            media_id.to_string(),
            input_path,
            requested_quality.as_str(),
            resolved_quality.as_str(),
            output_path,
            now.to_rfc3339(),
            now.to_rfc3339(),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(TranscodeJob {
        id,
        media_id,
        input_path: input_path.to_string(),
        requested_quality,
        resolved_quality,
        state: JobState::Completed {
            output_path: output_path.to_string(),
        },
        created_at: now,
        started_at: None,
        completed_at: Some(now),
    })
}

/// Get a transcode job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<TranscodeJob> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM transcode_jobs WHERE id = ?"),
        [id.to_string()],
        map_job_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::job_not_found(id.to_string()),
        _ => Error::database(e.to_string()),
    })
}

/// Get the active (pending or processing) job for a (media, tier) key.
///
/// At most one such job exists at a time; concurrent submits for the
/// same key coalesce onto it.
pub fn get_active_job_for_key(
    conn: &Connection,
    media_id: MediaId,
    resolved_quality: QualityTier,
) -> Result<Option<TranscodeJob>> {
    match conn.query_row(
        &format!(
            "SELECT {JOB_COLUMNS} FROM transcode_jobs
             WHERE media_id = ? AND resolved_quality = ?
               AND status IN ('pending', 'processing')
             ORDER BY created_at DESC LIMIT 1"
        ),
        params![media_id.to_string(), resolved_quality.as_str()],
        map_job_row,
    ) {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Transition a job from pending to processing.
pub fn start_job(conn: &Connection, id: JobId) -> Result<()> {
    let now = Utc::now();
    let affected = conn
        .execute(
            "UPDATE transcode_jobs SET status = 'processing', started_at = ?
             WHERE id = ? AND status = 'pending'",
            params![now.to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::job_not_found(id.to_string()));
    }

    Ok(())
}

/// Update the advisory progress of a processing job.
pub fn update_progress(conn: &Connection, id: JobId, progress: f64) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE transcode_jobs SET progress = ?
             WHERE id = ? AND status = 'processing'",
            params![progress, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::job_not_found(id.to_string()));
    }

    Ok(())
}

/// Complete a processing job with its published output path.
pub fn complete_job(conn: &Connection, id: JobId, output_path: &str) -> Result<()> {
    let now = Utc::now();
    let affected = conn
        .execute(
            "UPDATE transcode_jobs SET status = 'completed', progress = 100,
             output_path = ?, completed_at = ?
             WHERE id = ? AND status = 'processing'",
            params![output_path, now.to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::job_not_found(id.to_string()));
    }

    Ok(())
}

/// Fail a pending or processing job with a diagnostic message.
pub fn fail_job(conn: &Connection, id: JobId, error_message: &str) -> Result<()> {
    let now = Utc::now();
    let affected = conn
        .execute(
            "UPDATE transcode_jobs SET status = 'failed', error_message = ?, completed_at = ?
             WHERE id = ? AND status IN ('pending', 'processing')",
            params![error_message, now.to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::job_not_found(id.to_string()));
    }

    Ok(())
}

/// Delete terminal jobs whose completion predates the cutoff.
///
/// Housekeeping for external callers; nothing in the service invokes it
/// on its own.
pub fn prune_terminal_jobs(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let affected = conn
        .execute(
            "DELETE FROM transcode_jobs
             WHERE status IN ('completed', 'failed')
             AND completed_at < ?",
            params![cutoff.to_rfc3339()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected)
}

/// Fail all jobs left active by a previous process.
///
/// Run once at service startup: an active row without a live worker would
/// otherwise absorb coalesced submits forever. Returns the number of jobs
/// failed.
pub fn reset_orphaned_jobs(conn: &Connection) -> Result<usize> {
    let now = Utc::now();
    let affected = conn
        .execute(
            "UPDATE transcode_jobs
             SET status = 'failed',
                 error_message = 'Interrupted by service restart',
                 completed_at = ?
             WHERE status IN ('pending', 'processing')",
            params![now.to_rfc3339()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{init_memory_pool, PooledConnection};

    fn setup_test_db() -> PooledConnection {
        let pool = init_memory_pool().unwrap();
        pool.get().unwrap()
    }

    #[test]
    fn test_create_job() {
        let conn = setup_test_db();
        let media_id = MediaId::new();

        let job = create_job(
            &conn,
            media_id,
            "/media/movie.mkv",
            QualityTier::Q1080,
            QualityTier::Q720,
        )
        .unwrap();

        assert_eq!(job.media_id, media_id);
        assert_eq!(job.requested_quality, QualityTier::Q1080);
        assert_eq!(job.resolved_quality, QualityTier::Q720);
        assert_eq!(job.state, JobState::Pending);

        let fetched = get_job(&conn, job.id).unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.state, JobState::Pending);
    }

    #[test]
    fn test_get_job_not_found() {
        let conn = setup_test_db();
        let err = get_job(&conn, JobId::new()).unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[test]
    fn test_job_lifecycle() {
        let conn = setup_test_db();
        let job = create_job(
            &conn,
            MediaId::new(),
            "/media/movie.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();

        // Start
        start_job(&conn, job.id).unwrap();
        let job_row = get_job(&conn, job.id).unwrap();
        assert_eq!(job_row.state, JobState::Processing { progress: 0.0 });
        assert!(job_row.started_at.is_some());

        // Progress
        update_progress(&conn, job.id, 37.5).unwrap();
        let job_row = get_job(&conn, job.id).unwrap();
        assert_eq!(job_row.state, JobState::Processing { progress: 37.5 });

        // Complete
        complete_job(&conn, job.id, "/cache/m/720p.mp4").unwrap();
        let job_row = get_job(&conn, job.id).unwrap();
        assert_eq!(job_row.output_path(), Some("/cache/m/720p.mp4"));
        assert_eq!(job_row.state.progress(), 100.0);
        assert!(job_row.completed_at.is_some());
    }

    #[test]
    fn test_fail_job() {
        let conn = setup_test_db();
        let job = create_job(
            &conn,
            MediaId::new(),
            "/media/movie.mkv",
            QualityTier::Q480,
            QualityTier::Q480,
        )
        .unwrap();

        start_job(&conn, job.id).unwrap();
        fail_job(&conn, job.id, "encoder exited with code 1").unwrap();

        let job_row = get_job(&conn, job.id).unwrap();
        assert_eq!(
            job_row.error_message(),
            Some("encoder exited with code 1")
        );
        assert!(job_row.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let conn = setup_test_db();
        let job = create_job(
            &conn,
            MediaId::new(),
            "/media/movie.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();

        start_job(&conn, job.id).unwrap();
        complete_job(&conn, job.id, "/cache/out.mp4").unwrap();

        // No transition may leave a terminal state.
        assert!(start_job(&conn, job.id).is_err());
        assert!(update_progress(&conn, job.id, 50.0).is_err());
        assert!(fail_job(&conn, job.id, "late failure").is_err());
        assert!(complete_job(&conn, job.id, "/cache/other.mp4").is_err());

        let job_row = get_job(&conn, job.id).unwrap();
        assert_eq!(job_row.output_path(), Some("/cache/out.mp4"));
    }

    #[test]
    fn test_insert_completed_job() {
        let conn = setup_test_db();
        let job = insert_completed_job(
            &conn,
            MediaId::new(),
            "/media/movie.mkv",
            QualityTier::Q1080,
            QualityTier::Q720,
            "/cache/m/720p.mp4",
        )
        .unwrap();

        let fetched = get_job(&conn, job.id).unwrap();
        assert_eq!(fetched.output_path(), Some("/cache/m/720p.mp4"));
        assert_eq!(fetched.state.progress(), 100.0);
        assert!(fetched.completed_at.is_some());
    }

    #[test]
    fn test_get_active_job_for_key() {
        let conn = setup_test_db();
        let media_id = MediaId::new();

        assert!(get_active_job_for_key(&conn, media_id, QualityTier::Q720)
            .unwrap()
            .is_none());

        let job = create_job(
            &conn,
            media_id,
            "/media/movie.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();

        // Pending counts as active.
        let active = get_active_job_for_key(&conn, media_id, QualityTier::Q720)
            .unwrap()
            .unwrap();
        assert_eq!(active.id, job.id);

        // A different tier for the same media is a different key.
        assert!(get_active_job_for_key(&conn, media_id, QualityTier::Q480)
            .unwrap()
            .is_none());

        // Processing still counts as active.
        start_job(&conn, job.id).unwrap();
        assert!(get_active_job_for_key(&conn, media_id, QualityTier::Q720)
            .unwrap()
            .is_some());

        // Terminal jobs are not active.
        complete_job(&conn, job.id, "/cache/out.mp4").unwrap();
        assert!(get_active_job_for_key(&conn, media_id, QualityTier::Q720)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_prune_terminal_jobs() {
        let conn = setup_test_db();
        let done = create_job(
            &conn,
            MediaId::new(),
            "/a.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();
        start_job(&conn, done.id).unwrap();
        complete_job(&conn, done.id, "/cache/a.mp4").unwrap();

        let active = create_job(
            &conn,
            MediaId::new(),
            "/b.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();

        // A cutoff in the future prunes all terminal jobs but leaves
        // active ones alone.
        let pruned =
            prune_terminal_jobs(&conn, Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(pruned, 1);
        assert!(matches!(
            get_job(&conn, done.id).unwrap_err(),
            Error::JobNotFound(_)
        ));
        assert!(get_job(&conn, active.id).is_ok());

        // A cutoff in the past prunes nothing.
        let job2 = create_job(
            &conn,
            MediaId::new(),
            "/c.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();
        start_job(&conn, job2.id).unwrap();
        fail_job(&conn, job2.id, "boom").unwrap();
        let pruned =
            prune_terminal_jobs(&conn, Utc::now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(pruned, 0);
    }

    #[test]
    fn test_reset_orphaned_jobs() {
        let conn = setup_test_db();
        let pending = create_job(
            &conn,
            MediaId::new(),
            "/a.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();
        let running = create_job(
            &conn,
            MediaId::new(),
            "/b.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();
        start_job(&conn, running.id).unwrap();
        let done = create_job(
            &conn,
            MediaId::new(),
            "/c.mkv",
            QualityTier::Q720,
            QualityTier::Q720,
        )
        .unwrap();
        start_job(&conn, done.id).unwrap();
        complete_job(&conn, done.id, "/cache/c.mp4").unwrap();

        let reset = reset_orphaned_jobs(&conn).unwrap();
        assert_eq!(reset, 2);

        for id in [pending.id, running.id] {
            let job = get_job(&conn, id).unwrap();
            assert_eq!(
                job.error_message(),
                Some("Interrupted by service restart")
            );
        }
        // Completed jobs are untouched.
        let job = get_job(&conn, done.id).unwrap();
        assert_eq!(job.output_path(), Some("/cache/c.mp4"));
    }
}
