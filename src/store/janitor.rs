//! Periodic cleanup of expired rate windows.
//!
//! Windows older than the current one are never read again by the rate
//! limiter; removing them only bounds storage growth. The window size is
//! read on every sweep so a reloaded config is honoured immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::observability::metrics;
use crate::security::{now_millis, window_start};
use crate::store::RateWindowStore;

/// Current rate window size in milliseconds.
pub type WindowSource = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct WindowJanitor {
    store: Arc<dyn RateWindowStore>,
    window_ms: WindowSource,
    interval: Duration,
}

impl WindowJanitor {
    pub fn new(store: Arc<dyn RateWindowStore>, window_ms: WindowSource, interval: Duration) -> Self {
        Self {
            store,
            window_ms,
            interval,
        }
    }

    /// A janitor for a window size that never changes.
    pub fn fixed(store: Arc<dyn RateWindowStore>, window_ms: i64, interval: Duration) -> Self {
        Self::new(store, Arc::new(move || window_ms), interval)
    }

    /// Purge every window that started before the current window.
    pub async fn sweep(&self, now_ms: i64) -> u64 {
        let window_ms = (self.window_ms)();
        if window_ms <= 0 {
            return 0;
        }
        let cutoff = window_start(now_ms, window_ms);
        match self.store.purge_windows_before(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(removed, cutoff, "Purged expired rate windows");
                    metrics::record_windows_purged(removed);
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rate window purge failed");
                0
            }
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Rate window janitor starting");

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(now_millis()).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate window janitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
