//! The rendition store: finished outputs on disk plus their cache rows.
//!
//! A rendition only counts if its row *and* its file both exist. Rows
//! pointing at missing files are treated as absent and removed on the
//! next lookup, so out-of-band deletion heals itself. Active readers pin
//! entries with a lease so the eviction sweep cannot pull a file out from
//! under them.

use dashmap::DashMap;
use mediakiln_common::{MediaId, QualityTier, Result};
use mediakiln_db::models::CachedRendition;
use mediakiln_db::queries::rendition_cache;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type RenditionKey = (MediaId, QualityTier);

/// Disk-plus-rows view of the rendition cache.
pub struct RenditionStore {
    cache_dir: PathBuf,
    leases: Arc<DashMap<RenditionKey, usize>>,
}

impl RenditionStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            leases: Arc::new(DashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Canonical output location for a (media, tier) rendition.
    pub fn rendition_path(&self, media_id: MediaId, quality: QualityTier) -> PathBuf {
        self.cache_dir
            .join(media_id.to_string())
            .join(format!("{}.mp4", quality))
    }

    /// Look up a usable rendition, refreshing its last-accessed time.
    ///
    /// A row whose file has disappeared is deleted and reported as a
    /// miss.
    pub fn lookup(
        &self,
        conn: &Connection,
        media_id: MediaId,
        quality: QualityTier,
    ) -> Result<Option<CachedRendition>> {
        let Some(rendition) = rendition_cache::get(conn, media_id, quality)? else {
            return Ok(None);
        };

        if !Path::new(&rendition.output_path).exists() {
            warn!(
                %media_id,
                %quality,
                path = %rendition.output_path,
                "cached rendition file missing; removing stale row"
            );
            rendition_cache::delete(conn, media_id, quality)?;
            return Ok(None);
        }

        rendition_cache::touch(conn, media_id, quality)?;
        Ok(Some(rendition))
    }

    /// Register a finished output file under its key.
    ///
    /// The caller must have moved the file into place first; publishing
    /// is just the row upsert (last writer wins).
    pub fn publish(
        &self,
        conn: &Connection,
        media_id: MediaId,
        quality: QualityTier,
        output_path: &Path,
        file_size: i64,
        duration_secs: Option<f64>,
    ) -> Result<CachedRendition> {
        rendition_cache::upsert(
            conn,
            media_id,
            quality,
            &output_path.to_string_lossy(),
            file_size,
            duration_secs,
        )
    }

    /// Tiers with a usable rendition for a media item, ascending.
    ///
    /// Applies the same self-heal as `lookup` to each row on the way.
    pub fn available_qualities(
        &self,
        conn: &Connection,
        media_id: MediaId,
    ) -> Result<Vec<QualityTier>> {
        let mut qualities = Vec::new();
        for rendition in rendition_cache::list_for_media(conn, media_id)? {
            if Path::new(&rendition.output_path).exists() {
                qualities.push(rendition.quality);
            } else {
                warn!(
                    %media_id,
                    quality = %rendition.quality,
                    path = %rendition.output_path,
                    "cached rendition file missing; removing stale row"
                );
                rendition_cache::delete(conn, media_id, rendition.quality)?;
            }
        }
        Ok(qualities)
    }

    /// Look up a rendition and pin it against eviction.
    ///
    /// The lease is released when the returned guard drops; the eviction
    /// sweep skips pinned keys. Use this when the file is about to be
    /// read (e.g. streamed out) rather than just reported.
    pub fn checkout(
        &self,
        conn: &Connection,
        media_id: MediaId,
        quality: QualityTier,
    ) -> Result<Option<RenditionLease>> {
        let Some(rendition) = self.lookup(conn, media_id, quality)? else {
            return Ok(None);
        };

        let key = (media_id, quality);
        *self.leases.entry(key).or_insert(0) += 1;

        Ok(Some(RenditionLease {
            path: PathBuf::from(&rendition.output_path),
            key,
            leases: Arc::clone(&self.leases),
        }))
    }

    fn is_leased(&self, key: &RenditionKey) -> bool {
        self.leases.get(key).map(|count| *count > 0).unwrap_or(false)
    }

    /// Evict renditions not accessed within `ttl`.
    ///
    /// Best effort per entry: a failed file deletion is logged and the
    /// row is removed anyway (the next publish recreates both), and one
    /// bad entry never aborts the rest of the sweep. Leased entries are
    /// skipped and picked up by a later sweep. Returns the number of
    /// rows removed.
    pub fn evict_older_than(&self, conn: &Connection, ttl: Duration) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = chrono::Utc::now() - ttl;

        let mut removed = 0;
        for rendition in rendition_cache::list_older_than(conn, cutoff)? {
            let key = (rendition.media_id, rendition.quality);
            if self.is_leased(&key) {
                debug!(
                    media_id = %rendition.media_id,
                    quality = %rendition.quality,
                    "skipping eviction of leased rendition"
                );
                continue;
            }

            match std::fs::remove_file(&rendition.output_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        path = %rendition.output_path,
                        error = %e,
                        "failed to delete evicted rendition file"
                    );
                }
            }

            if rendition_cache::delete(conn, rendition.media_id, rendition.quality)? {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// Pin on a rendition held by an active reader.
pub struct RenditionLease {
    path: PathBuf,
    key: RenditionKey,
    leases: Arc<DashMap<RenditionKey, usize>>,
}

impl RenditionLease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RenditionLease {
    fn drop(&mut self) {
        if let dashmap::mapref::entry::Entry::Occupied(mut entry) = self.leases.entry(self.key) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }
}
