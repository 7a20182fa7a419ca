use crate::cache::SnapshotCache;
use crate::collectors::{Collect, CollectError, Collected};
use crate::metrics::Metrics;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error("collection task aborted: {0}")]
    Aborted(#[from] JoinError),
}

pub struct Scheduler<C> {
    collector: Arc<Mutex<C>>,
    cache: Arc<SnapshotCache>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl<C: Collect> Scheduler<C> {
    pub fn new(
        collector: C,
        cache: Arc<SnapshotCache>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self {
            collector: Arc::new(Mutex::new(collector)),
            cache,
            metrics,
            interval,
        }
    }

    // Probes block (CPU window, table scans), so they run off the async workers.
    async fn collect(&self) -> Result<Collected, TickError> {
        let collector = self.collector.clone();
        let collected = tokio::task::spawn_blocking(move || {
            let mut guard = collector.lock().unwrap_or_else(PoisonError::into_inner);
            guard.collect()
        })
        .await??;
        Ok(collected)
    }

    // Returns whether a new snapshot was published.
    pub async fn tick(&self) -> bool {
        let started = Instant::now();
        match self.collect().await {
            Ok(Collected {
                snapshot,
                exposition,
            }) => {
                let ts = snapshot.timestamp;
                self.cache.write(snapshot, exposition).await;
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    timestamp = ts,
                    "snapshot published"
                );
                true
            }
            Err(err) => {
                self.metrics.inc_refresh_failure();
                warn!(error = %err, "refresh tick failed, keeping previous snapshot");
                false
            }
        }
    }

    pub async fn prime(&self) -> bool {
        let ok = self.tick().await;
        if !ok {
            warn!("initial collection failed, serving defaults until the next tick");
        }
        ok
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately and `prime` has covered it.
        ticker.tick().await;
        info!(
            interval = %humantime::format_duration(self.interval),
            "refresh loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("refresh loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
