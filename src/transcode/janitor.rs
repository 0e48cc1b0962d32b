//! Background eviction of unused renditions.
//!
//! The janitor runs on its own schedule, independent of worker activity.
//! Each sweep evicts renditions whose last access is older than the TTL.
//! It only ever touches cache rows: in-flight encodes live in the temp
//! directory and the jobs table, out of its reach.

use crate::transcode::store::RenditionStore;
use mediakiln_db::{get_conn, DbPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct CacheJanitor {
    pool: DbPool,
    store: Arc<RenditionStore>,
    ttl: Duration,
    interval: Duration,
}

impl CacheJanitor {
    pub fn new(
        pool: DbPool,
        store: Arc<RenditionStore>,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            ttl,
            interval,
        }
    }

    /// Start the sweep loop. Runs until a shutdown message arrives (or
    /// the sender is dropped).
    pub fn start(self, mut shutdown_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                ttl_secs = self.ttl.as_secs(),
                interval_secs = self.interval.as_secs(),
                "cache janitor started"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so the first
            // sweep happens one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => self.sweep(),
                }
            }

            info!("cache janitor stopped");
        })
    }

    /// One eviction pass. Errors are logged, never fatal to the loop.
    fn sweep(&self) {
        let conn = match get_conn(&self.pool) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "cache sweep skipped; database unavailable");
                return;
            }
        };

        match self.store.evict_older_than(&conn, self.ttl) {
            Ok(0) => {}
            Ok(evicted) => info!(evicted, "cache sweep evicted stale renditions"),
            Err(e) => warn!(error = %e, "cache sweep failed"),
        }
    }
}
