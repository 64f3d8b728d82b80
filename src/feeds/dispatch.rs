use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::error::{FeedError, Result};
use super::preview::LinkPreview;
use super::render::{self, Payload};
use super::types::{FeedConfig, FeedItem, FeedMeta};

/// Posts a payload to one destination channel.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, channel_id: u64, payload: &Payload) -> Result<()>;
}

/// What actually reached a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Full,
    Minimal,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<(u64, std::result::Result<Delivery, FeedError>)>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

/// Renders items and fans them out to every destination of a feed.
/// Nothing here returns an error: each destination gets its own outcome.
pub struct Dispatcher {
    sink: Arc<dyn DeliverySink>,
    preview: Arc<dyn LinkPreview>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn DeliverySink>, preview: Arc<dyn LinkPreview>) -> Self {
        Self { sink, preview }
    }

    pub async fn dispatch(
        &self,
        item: &FeedItem,
        feed: &FeedConfig,
        meta: &FeedMeta,
    ) -> DispatchReport {
        let payload = match render::render(item, feed, meta, self.preview.as_ref()).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    feed = %feed.label(),
                    item = item.display_title(),
                    "Render failed, sending minimal message: {}",
                    e
                );
                render::render_minimal(item, feed, meta)
            }
        };

        let mut report = DispatchReport::default();
        for &channel_id in &feed.channels {
            let outcome = self.send_one(channel_id, item, feed, meta, &payload).await;
            report.outcomes.push((channel_id, outcome));
        }
        report
    }

    async fn send_one(
        &self,
        channel_id: u64,
        item: &FeedItem,
        feed: &FeedConfig,
        meta: &FeedMeta,
        payload: &Payload,
    ) -> std::result::Result<Delivery, FeedError> {
        let first = match self.sink.deliver(channel_id, payload).await {
            Ok(()) => {
                debug!(channel = channel_id, item = item.display_title(), "item delivered");
                return Ok(if payload.is_minimal() {
                    Delivery::Minimal
                } else {
                    Delivery::Full
                });
            }
            Err(e) => e,
        };

        if payload.is_minimal() {
            error!(channel = channel_id, item = item.display_title(), "Delivery failed: {}", first);
            return Err(first);
        }

        warn!(
            channel = channel_id,
            item = item.display_title(),
            "Delivery failed, retrying minimal message: {}",
            first
        );
        let minimal = render::render_minimal(item, feed, meta);
        match self.sink.deliver(channel_id, &minimal).await {
            Ok(()) => Ok(Delivery::Minimal),
            Err(e) => {
                error!(
                    channel = channel_id,
                    item = item.display_title(),
                    "Minimal delivery failed too: {}",
                    e
                );
                Err(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::RecordingSink;
    use super::*;
    use crate::feeds::render::fakes::StubPreview;

    fn feed(channels: Vec<u64>) -> FeedConfig {
        FeedConfig {
            url: "https://rss.example.com/feed.xml".to_string(),
            name: Some("Example".to_string()),
            channels,
        }
    }

    fn item() -> FeedItem {
        FeedItem {
            id: Some("g1".to_string()),
            title: Some("Headline".to_string()),
            link: Some("https://example.com/story".to_string()),
            ..Default::default()
        }
    }

    fn dispatcher(sink: Arc<RecordingSink>) -> Dispatcher {
        Dispatcher::new(sink, Arc::new(StubPreview::default()))
    }

    #[tokio::test]
    async fn test_middle_destination_failure_is_isolated() {
        let sink = Arc::new(RecordingSink::failing(&[2]));
        let report = dispatcher(sink.clone())
            .dispatch(&item(), &feed(vec![1, 2, 3]), &FeedMeta::default())
            .await;

        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(report.outcomes[1], (2, Err(FeedError::Delivery(_)))));

        let sent = sink.sent.lock().await;
        let channels: Vec<u64> = sent.iter().map(|(c, _)| *c).collect();
        assert_eq!(channels, vec![1, 3]);
        assert!(sent.iter().all(|(_, p)| !p.is_minimal()));
    }

    #[tokio::test]
    async fn test_render_failure_degrades_to_minimal() {
        let sink = Arc::new(RecordingSink::default());
        let mut bad = item();
        bad.link = Some("mailto:someone@example.com".to_string());
        let report = dispatcher(sink.clone())
            .dispatch(&bad, &feed(vec![7]), &FeedMeta::default())
            .await;

        assert!(matches!(report.outcomes[0], (7, Ok(Delivery::Minimal))));
        assert_eq!(
            sink.titles().await,
            vec!["**Headline**\nmailto:someone@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejected_rich_message_falls_back_per_destination() {
        let sink = Arc::new(RecordingSink {
            reject_rich: true,
            ..Default::default()
        });
        let report = dispatcher(sink.clone())
            .dispatch(&item(), &feed(vec![1, 2]), &FeedMeta::default())
            .await;
        assert_eq!(report.delivered(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|(_, r)| matches!(r, Ok(Delivery::Minimal))));
    }

    #[tokio::test]
    async fn test_total_failure_is_reported_not_raised() {
        let sink = Arc::new(RecordingSink::failing(&[1]));
        let report = dispatcher(sink.clone())
            .dispatch(&item(), &feed(vec![1]), &FeedMeta::default())
            .await;
        assert_eq!(report.failed(), 1);
        assert!(sink.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_destinations() {
        let sink = Arc::new(RecordingSink::default());
        let report = dispatcher(sink).dispatch(&item(), &feed(vec![]), &FeedMeta::default()).await;
        assert!(report.outcomes.is_empty());
    }
}
