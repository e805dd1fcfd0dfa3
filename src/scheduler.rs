//! Periodic flush of the aggregation store
//!
//! Every tick takes a snapshot of all resident days under the store lock,
//! releases the lock, then writes each day file on a blocking thread.
//! Past days that were written successfully are evicted from memory so only
//! today's bucket survives a rollover.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::codec::DayFiles;
use crate::store::{self, AggregationStore};

/// Outcome of one flush
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushSummary {
    pub written: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// Write every resident day and evict flushed past days
pub async fn flush_now(store: &AggregationStore, files: &DayFiles) -> FlushSummary {
    flush_as_of(store, files, store::today()).await
}

async fn flush_as_of(store: &AggregationStore, files: &DayFiles, today: NaiveDate) -> FlushSummary {
    let snapshot = store.snapshot_all();
    if snapshot.is_empty() {
        return FlushSummary::default();
    }
    let drained = store.drained_days();

    let files = files.clone();
    let results = tokio::task::spawn_blocking(move || {
        let results = snapshot
            .iter()
            .map(|(day, bucket)| {
                let result = if drained.contains(day) {
                    // Earlier actions of this day are only on disk
                    let mut merged = files.read(*day);
                    merged.merge(bucket);
                    files.write(*day, &merged)
                } else {
                    files.write(*day, bucket)
                };
                (*day, result)
            })
            .collect::<Vec<_>>();
        (snapshot, results)
    })
    .await;

    let (mut snapshot, results) = match results {
        Ok(results) => results,
        Err(e) => {
            error!("Flush task failed: {}", e);
            return FlushSummary {
                failed: store.resident_days().len(),
                ..FlushSummary::default()
            };
        }
    };

    let mut summary = FlushSummary::default();
    for (day, result) in results {
        match result {
            Ok(path) => {
                debug!("Flushed {} to {}", day, path.display());
                summary.written += 1;
            }
            Err(e) => {
                error!("Failed to flush {}: {}", day, e);
                snapshot.remove(&day);
                summary.failed += 1;
            }
        }
    }

    summary.evicted = store.evict_before(today, &snapshot);
    if summary.evicted > 0 {
        info!("Evicted {} past day(s) from memory", summary.evicted);
    }
    summary
}

/// Handle to the background flush task
pub struct FlushScheduler {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    store: Arc<AggregationStore>,
    files: DayFiles,
}

impl FlushScheduler {
    /// Spawn the flush loop on the current tokio runtime
    pub fn start(store: Arc<AggregationStore>, files: DayFiles, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(flush_loop(store.clone(), files.clone(), every, cancel.clone()));
        info!("Flush scheduler started (interval={}s)", every.as_secs());

        Self {
            cancel,
            task: Some(task),
            store,
            files,
        }
    }

    /// Stop the loop and write whatever was recorded since the last tick
    pub async fn stop(mut self) -> FlushSummary {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Flush scheduler task ended abnormally: {}", e);
            }
        }

        let summary = flush_now(&self.store, &self.files).await;
        info!(
            "Flush scheduler stopped (final flush wrote {} day(s), {} failed)",
            summary.written, summary.failed
        );
        summary
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        // The final flush only happens through `stop`
        self.cancel.cancel();
    }
}

async fn flush_loop(
    store: Arc<AggregationStore>,
    files: DayFiles,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let summary = flush_now(&store, &files).await;
                if summary.failed > 0 {
                    warn!("Flush incomplete: {} written, {} failed", summary.written, summary.failed);
                }
            }
        }
    }
}
