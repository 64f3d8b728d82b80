use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::dedup::{select_new_items, watermark_for};
use super::dispatch::Dispatcher;
use super::fetch::FeedSource;
use super::store::WatermarkStore;
use super::types::FeedConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleStatus {
    Completed,
    /// Previous cycle for the same feed still running.
    Skipped,
    FetchFailed(String),
    /// Items went out but the watermark stayed where it was.
    StoreWriteFailed(String),
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub feed: String,
    pub status: CycleStatus,
    pub fetched: usize,
    pub new_items: usize,
    pub deliveries: usize,
    pub failed_deliveries: usize,
    pub watermark_written: bool,
}

impl CycleReport {
    fn new(feed: &FeedConfig, status: CycleStatus) -> Self {
        Self {
            feed: feed.label().to_string(),
            status,
            fetched: 0,
            new_items: 0,
            deliveries: 0,
            failed_deliveries: 0,
            watermark_written: false,
        }
    }
}

/// Runs fetch → dedup → dispatch → watermark for every configured feed,
/// once at startup and then on a fixed wall-clock interval.
pub struct Poller {
    feeds: Vec<FeedConfig>,
    source: Arc<dyn FeedSource>,
    store: Arc<dyn WatermarkStore>,
    dispatcher: Dispatcher,
    interval: Duration,
    /// One guard per feed URL; a held guard means a cycle is in flight.
    in_flight: HashMap<String, Mutex<()>>,
}

impl Poller {
    pub fn new(
        feeds: Vec<FeedConfig>,
        source: Arc<dyn FeedSource>,
        store: Arc<dyn WatermarkStore>,
        dispatcher: Dispatcher,
        interval: Duration,
    ) -> Self {
        let in_flight = feeds
            .iter()
            .map(|f| (f.url.clone(), Mutex::new(())))
            .collect();
        Self {
            feeds,
            source,
            store,
            dispatcher,
            interval,
            in_flight,
        }
    }

    pub fn feeds(&self) -> &[FeedConfig] {
        &self.feeds
    }

    /// Tick forever. The first tick fires immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                feeds = self.feeds.len(),
                interval_secs = self.interval.as_secs(),
                "RSS poller started"
            );
            loop {
                ticker.tick().await;
                // Cycles run detached so a slow feed never delays the next tick.
                let poller = self.clone();
                tokio::spawn(async move {
                    poller.run_once().await;
                });
            }
        })
    }

    /// One pass over every feed, sequentially. Feed failures stay with their feed.
    pub async fn run_once(&self) -> Vec<CycleReport> {
        if self.feeds.is_empty() {
            info!("No RSS feeds configured");
            return Vec::new();
        }

        let mut reports = Vec::with_capacity(self.feeds.len());
        for feed in &self.feeds {
            reports.push(self.poll_feed(feed).await);
        }

        let new_items: usize = reports.iter().map(|r| r.new_items).sum();
        info!(feeds = reports.len(), new_items, "RSS pass complete");
        reports
    }

    /// Run a cycle unless one is already running for this feed.
    pub async fn poll_feed(&self, feed: &FeedConfig) -> CycleReport {
        let Some(guard) = self.in_flight.get(&feed.url) else {
            return self.run_cycle(feed).await;
        };
        let Ok(_held) = guard.try_lock() else {
            warn!(feed = %feed.label(), "Previous cycle still running, skipping this tick");
            return CycleReport::new(feed, CycleStatus::Skipped);
        };
        self.run_cycle(feed).await
    }

    async fn run_cycle(&self, feed: &FeedConfig) -> CycleReport {
        info!(feed = %feed.label(), url = %feed.url, "Processing feed");

        let parsed = match self.source.fetch(&feed.url).await {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(feed = %feed.label(), url = %feed.url, "Feed fetch failed: {}", e);
                return CycleReport::new(feed, CycleStatus::FetchFailed(e.to_string()));
            }
        };

        let watermark = match self.store.get(&feed.url).await {
            Ok(mark) => mark,
            Err(e) => {
                warn!(feed = %feed.label(), "Watermark unreadable, treating as first run: {}", e);
                None
            }
        };
        debug!(feed = %feed.label(), watermark = ?watermark, "loaded watermark");

        let mut report = CycleReport::new(feed, CycleStatus::Completed);
        report.fetched = parsed.items.len();
        let fresh = select_new_items(parsed.items, watermark.as_ref());
        report.new_items = fresh.len();
        info!(
            feed = %feed.label(),
            fetched = report.fetched,
            new_items = fresh.len(),
            "dedup done"
        );

        for item in &fresh {
            let outcome = self.dispatcher.dispatch(item, feed, &parsed.meta).await;
            report.deliveries += outcome.delivered();
            report.failed_deliveries += outcome.failed();
        }

        // The watermark tracks the last item attempted, delivered or not.
        let Some(last) = fresh.last() else {
            return report;
        };
        match self.store.put(&feed.url, &watermark_for(last)).await {
            Ok(()) => {
                report.watermark_written = true;
                info!(feed = %feed.label(), last = last.display_title(), "watermark advanced");
            }
            Err(e) => {
                error!(
                    feed = %feed.label(),
                    "Watermark write failed, items will be reconsidered next cycle: {}",
                    e
                );
                report.status = CycleStatus::StoreWriteFailed(e.to_string());
            }
        }
        report
    }
}
