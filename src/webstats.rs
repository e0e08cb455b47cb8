use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, mpsc};
use chrono::prelude::*;

/// Queue size for messages to the stats collector
const WEBSTATS_QUEUE_SIZE: usize = 128;

/// An event as sent over the stats channel
#[derive(Debug)]
pub enum WebStatsEvent {
    /// A request reached /track
    EventReceived,
    /// ... and its event was stored
    EventAccepted,
    /// ... or its payload was refused
    EventRejected,
    /// ... or storage failed and the event was dropped
    EventFailed,

    Fetch(oneshot::Sender<WebStats>),
}

/// Basic statistics for the web service, since startup
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WebStats {
    pub up_since: DateTime<Utc>,
    pub events_received: u64,
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub events_failed: u64,
}

/// Web statistics collector channel
pub struct WebStatsChannel {
    channel_tx: mpsc::Sender<WebStatsEvent>,
    channel_rx: mpsc::Receiver<WebStatsEvent>,
    stats: WebStats,
}

impl WebStatsChannel {
    /// Initialises a new collector
    pub fn new() -> Self {
        let (channel_tx, channel_rx) = mpsc::channel::<WebStatsEvent>(WEBSTATS_QUEUE_SIZE);
        Self {
            channel_tx, channel_rx,
            stats: WebStats {
                up_since: Utc::now(),
                events_received: 0,
                events_accepted: 0,
                events_rejected: 0,
                events_failed: 0,
            }
        }
    }

    /// Returns a clone of the collector's channel
    pub fn handle(&self) -> mpsc::Sender<WebStatsEvent> {
        self.channel_tx.clone()
    }

    /// Runs the collector's channel, until every handle is gone
    pub async fn run_channel(mut self) {
        drop(self.channel_tx);
        while let Some(event) = self.channel_rx.recv().await {
            match event {
                WebStatsEvent::EventReceived => self.stats.events_received += 1,
                WebStatsEvent::EventAccepted => self.stats.events_accepted += 1,
                WebStatsEvent::EventRejected => self.stats.events_rejected += 1,
                WebStatsEvent::EventFailed => self.stats.events_failed += 1,

                WebStatsEvent::Fetch(return_tx) => {
                    if return_tx.send(self.stats.clone()).is_err() {
                        log::debug!("web stats requester went away before the reply");
                    }
                }
            }
        }
    }
}

/// Convenience function: sends an event to the statistics collector
pub async fn send_stats_event(stats: &mpsc::Sender<WebStatsEvent>, event: WebStatsEvent) {
    if let Err(e) = stats.send(event).await {
        log::debug!("web stats collector is gone, dropping {:?}", e.0);
    }
}

/// Convenience function: fetches current statistics from the collector
pub async fn fetch_stats(stats: &mpsc::Sender<WebStatsEvent>) -> Option<WebStats> {
    let (tx, rx) = oneshot::channel::<WebStats>();
    stats.send(WebStatsEvent::Fetch(tx)).await.ok()?;
    rx.await.ok()
}
