//! SQLite persistence for mediakiln.
//!
//! Two tables back the transcoding subsystem: `transcode_jobs` (the
//! durable job state machine) and `cached_renditions` (the durable
//! mapping from (media, quality) to a finished output file). Schema
//! lives in embedded migrations; all access goes through the typed
//! query functions in [`queries`].

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;

pub use pool::{get_conn, init_memory_pool, init_pool, DbPool, PooledConnection};
