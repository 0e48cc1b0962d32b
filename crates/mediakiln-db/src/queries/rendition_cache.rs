//! Rendition cache query operations.
//!
//! `cached_renditions` maps (media, quality) to a finished output file.
//! The primary key enforces at most one rendition per key; the upsert
//! keeps the last writer's metadata. File-existence checks live a layer
//! up in the store; these functions only see rows.

use chrono::{DateTime, Utc};
use mediakiln_common::{Error, MediaId, QualityTier, Result};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::models::CachedRendition;

const RENDITION_COLUMNS: &str =
    "media_id, quality, output_path, file_size, duration_secs, created_at, last_accessed_at";

fn map_rendition_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedRendition> {
    let conversion = |idx: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
    };

    let media_id = Uuid::parse_str(&row.get::<_, String>(0)?)
        .map_err(|e| conversion(0, e.to_string()))?;
    let quality: QualityTier = row
        .get::<_, String>(1)?
        .parse()
        .map_err(|e: String| conversion(1, e))?;

    Ok(CachedRendition {
        media_id: MediaId::from(media_id),
        quality,
        output_path: row.get(2)?,
        file_size: row.get(3)?,
        duration_secs: row.get(4)?,
        created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(5)?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_accessed_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(6)?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Insert or replace the rendition for a (media, quality) key.
///
/// Single-writer-wins: on conflict the incoming row's metadata stands,
/// with fresh timestamps.
pub fn upsert(
    conn: &Connection,
    media_id: MediaId,
    quality: QualityTier,
    output_path: &str,
    file_size: i64,
    duration_secs: Option<f64>,
) -> Result<CachedRendition> {
    let now = Utc::now();

    conn.execute(
        "INSERT INTO cached_renditions
         (media_id, quality, output_path, file_size, duration_secs, created_at, last_accessed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (media_id, quality) DO UPDATE SET
             output_path = excluded.output_path,
             file_size = excluded.file_size,
             duration_secs = excluded.duration_secs,
             created_at = excluded.created_at,
             last_accessed_at = excluded.last_accessed_at",
        params![
            media_id.to_string(),
            quality.as_str(),
            output_path,
            file_size,
            duration_secs,
            now.to_rfc3339(),
            now.to_rfc3339(),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(CachedRendition {
        media_id,
        quality,
        output_path: output_path.to_string(),
        file_size,
        duration_secs,
        created_at: now,
        last_accessed_at: now,
    })
}

/// Get the rendition row for a (media, quality) key, if any.
pub fn get(
    conn: &Connection,
    media_id: MediaId,
    quality: QualityTier,
) -> Result<Option<CachedRendition>> {
    match conn.query_row(
        &format!(
            "SELECT {RENDITION_COLUMNS} FROM cached_renditions
             WHERE media_id = ? AND quality = ?"
        ),
        params![media_id.to_string(), quality.as_str()],
        map_rendition_row,
    ) {
        Ok(rendition) => Ok(Some(rendition)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Refresh the last-accessed timestamp of a rendition.
pub fn touch(conn: &Connection, media_id: MediaId, quality: QualityTier) -> Result<()> {
    let now = Utc::now();
    conn.execute(
        "UPDATE cached_renditions SET last_accessed_at = ?
         WHERE media_id = ? AND quality = ?",
        params![now.to_rfc3339(), media_id.to_string(), quality.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Delete the rendition row for a key. Returns whether a row existed.
pub fn delete(conn: &Connection, media_id: MediaId, quality: QualityTier) -> Result<bool> {
    let affected = conn
        .execute(
            "DELETE FROM cached_renditions WHERE media_id = ? AND quality = ?",
            params![media_id.to_string(), quality.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected > 0)
}

/// List all rendition rows for a media item, in tier order.
pub fn list_for_media(conn: &Connection, media_id: MediaId) -> Result<Vec<CachedRendition>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {RENDITION_COLUMNS} FROM cached_renditions WHERE media_id = ?"
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let mut renditions = stmt
        .query_map([media_id.to_string()], map_rendition_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    renditions.sort_by_key(|r| r.quality);
    Ok(renditions)
}

/// List rendition rows whose last access predates the cutoff.
pub fn list_older_than(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<CachedRendition>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {RENDITION_COLUMNS} FROM cached_renditions
             WHERE last_accessed_at < ?
             ORDER BY last_accessed_at ASC"
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let renditions = stmt
        .query_map([cutoff.to_rfc3339()], map_rendition_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(renditions)
}
