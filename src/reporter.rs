use crate::storage::{EventStore, Store};
use crate::webstats::{WebStatsEvent, fetch_stats};

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use log;

/// Logs the number of stored events once, returns it if the store could be read
pub async fn report(store: &dyn EventStore, stats: &mpsc::Sender<WebStatsEvent>) -> Option<i64> {
    let total = match store.count().await {
        Ok(c) => c,
        Err(e) => {
            log::debug!("could not count events, skipping this report: {}", e);
            return None;
        }
    };

    match fetch_stats(stats).await {
        Some(web_stats) => log::info!(
            "[stats] total events={} (since {}: received={} accepted={} rejected={} failed={})",
            total,
            web_stats.up_since.to_rfc3339(),
            web_stats.events_received,
            web_stats.events_accepted,
            web_stats.events_rejected,
            web_stats.events_failed,
        ),
        None => log::info!("[stats] total events={}", total),
    }

    Some(total)
}

/// Reports every `interval` until shutdown is signalled (or its sender is dropped)
/// The first report comes one full interval after start
pub async fn run_reporter(store: Store, stats: mpsc::Sender<WebStatsEvent>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                report(store.as_ref(), &stats).await;
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            },
        }
    }

    log::debug!("statistics reporter stopped");
}
