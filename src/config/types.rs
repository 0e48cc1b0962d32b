use crate::transcode::SchedulerSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding the database and, by default, the cache.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// Worker slots for concurrently running encodes.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Wall-clock ceiling for one encode, in seconds.
    #[serde(default = "default_encode_timeout_secs")]
    pub encode_timeout_secs: u64,

    /// Advisory progress sampling interval, in seconds.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,

    /// Explicit ffmpeg binary (discovered on PATH if unset).
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Explicit ffprobe binary (discovered on PATH if unset).
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// ffmpeg encoder preset.
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Rendition cache directory (defaults to `<data_dir>/cache`).
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Unused renditions older than this are evicted.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// How often the janitor sweeps, in seconds.
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./mediakiln-data")
}
fn default_max_concurrent() -> usize {
    2
}
fn default_encode_timeout_secs() -> u64 {
    2 * 3600
}
fn default_progress_interval_secs() -> u64 {
    2
}
fn default_preset() -> String {
    "fast".to_string()
}
fn default_ttl_hours() -> u64 {
    24
}
fn default_janitor_interval_secs() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            encode_timeout_secs: default_encode_timeout_secs(),
            progress_interval_secs: default_progress_interval_secs(),
            ffmpeg_path: None,
            ffprobe_path: None,
            preset: default_preset(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_hours: default_ttl_hours(),
            janitor_interval_secs: default_janitor_interval_secs(),
        }
    }
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join("mediakiln.db")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("cache"))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_hours * 3600)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.cache.janitor_interval_secs)
    }

    /// Scheduler settings derived from this config, with the
    /// `MAX_CONCURRENT_TRANSCODES` environment override applied.
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        let cache_dir = self.cache_dir();
        SchedulerSettings {
            max_concurrent: effective_max_concurrent(self.transcode.max_concurrent),
            encode_timeout: Duration::from_secs(self.transcode.encode_timeout_secs),
            progress_interval: Duration::from_secs(self.transcode.progress_interval_secs),
            // Same filesystem as the cache so publishing stays an atomic
            // rename.
            temp_dir: cache_dir.join(".tmp"),
            cache_dir,
        }
    }
}

/// Apply the `MAX_CONCURRENT_TRANSCODES` environment override.
pub(crate) fn effective_max_concurrent(configured: usize) -> usize {
    std::env::var("MAX_CONCURRENT_TRANSCODES")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(configured)
}
