use std::collections::BTreeMap;

use async_trait::async_trait;
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::error::{FeedError, Result};
use super::types::{FeedWatermark, WatermarkRecord};

// No trailing slash (cnidarium substore convention)
pub const WATERMARK_PREFIX: &str = "rss/watermark";

/// Collision-resistant record id for a feed URL.
pub fn record_id(feed_url: &str) -> String {
    blake3::hash(feed_url.as_bytes()).to_hex().to_string()
}

fn watermark_key(feed_url: &str) -> String {
    format!("{}/{}", WATERMARK_PREFIX, record_id(feed_url))
}

/// Per-feed watermark persistence. At most one record per feed URL.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, feed_url: &str) -> Result<Option<FeedWatermark>>;

    /// Upsert. `created_at` is kept from an existing record, `updated_at` always moves.
    async fn put(&self, feed_url: &str, watermark: &FeedWatermark) -> Result<()>;

    async fn get_all(&self) -> Result<BTreeMap<String, WatermarkRecord>>;

    async fn delete(&self, feed_url: &str) -> Result<bool>;
}

fn store_err(e: impl std::fmt::Display) -> FeedError {
    FeedError::Store(e.to_string())
}

fn next_record(
    existing: Option<WatermarkRecord>,
    feed_url: &str,
    watermark: &FeedWatermark,
    now: i64,
) -> WatermarkRecord {
    WatermarkRecord {
        feed_url: feed_url.to_string(),
        last_item_id: watermark.last_item_id.clone(),
        last_publish_date: watermark.last_publish_date,
        last_title: watermark.last_title.clone(),
        created_at: existing.map(|r| r.created_at).unwrap_or(now),
        updated_at: now,
    }
}

/// Watermarks in cnidarium, keyed by the blake3 hash of the feed URL.
pub struct FeedStore {
    storage: Storage,
}

impl FeedStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    async fn read_record(&self, feed_url: &str) -> Result<Option<WatermarkRecord>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot
            .get_raw(&watermark_key(feed_url))
            .await
            .map_err(store_err)?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[async_trait]
impl WatermarkStore for FeedStore {
    async fn get(&self, feed_url: &str) -> Result<Option<FeedWatermark>> {
        Ok(self.read_record(feed_url).await?.map(|r| r.watermark()))
    }

    async fn put(&self, feed_url: &str, watermark: &FeedWatermark) -> Result<()> {
        let existing = self.read_record(feed_url).await.unwrap_or_else(|e| {
            warn!(feed = feed_url, "Existing watermark unreadable, overwriting: {}", e);
            None
        });
        let record = next_record(existing, feed_url, watermark, chrono::Utc::now().timestamp());

        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(watermark_key(feed_url), serde_json::to_vec(&record)?);
        self.storage.commit(delta).await.map_err(store_err)?;

        debug!(
            feed = feed_url,
            item_id = ?record.last_item_id,
            published = ?record.last_publish_date,
            "watermark stored"
        );
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, WatermarkRecord>> {
        let snapshot = self.storage.latest_snapshot();
        collect_records(snapshot.prefix_raw(WATERMARK_PREFIX)).await
    }

    async fn delete(&self, feed_url: &str) -> Result<bool> {
        if self.read_record(feed_url).await?.is_none() {
            return Ok(false);
        }
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.delete(watermark_key(feed_url));
        self.storage.commit(delta).await.map_err(store_err)?;
        debug!(feed = feed_url, "watermark deleted");
        Ok(true)
    }
}

/// Drain a raw prefix scan into records keyed by feed URL.
/// Undecodable values are skipped; a failing read aborts the whole listing.
async fn collect_records<S, E>(stream: S) -> Result<BTreeMap<String, WatermarkRecord>>
where
    S: Stream<Item = std::result::Result<(String, Vec<u8>), E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut results = BTreeMap::new();
    while let Some(entry) = stream.next().await {
        let (key, value) = entry.map_err(store_err)?;
        match serde_json::from_slice::<WatermarkRecord>(&value) {
            Ok(record) => {
                results.insert(record.feed_url.clone(), record);
            }
            Err(e) => warn!(key = %key, "Skipping undecodable watermark: {}", e),
        }
    }
    Ok(results)
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;

    fn mark(id: &str) -> FeedWatermark {
        FeedWatermark {
            last_item_id: Some(id.to_string()),
            last_publish_date: None,
            last_title: Some(format!("title {}", id)),
        }
    }

    #[test]
    fn test_record_id_is_stable_hex() {
        let a = record_id("https://example.com/feed.xml");
        assert_eq!(a, record_id("https://example.com/feed.xml"));
        assert_ne!(a, record_id("https://example.com/other.xml"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_upsert_keeps_created_at() {
        let first = next_record(None, "u", &mark("a"), 10);
        assert_eq!((first.created_at, first.updated_at), (10, 10));
        let second = next_record(Some(first), "u", &mark("b"), 20);
        assert_eq!((second.created_at, second.updated_at), (10, 20));
        assert_eq!(second.last_item_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_memory_store_one_record_per_feed() {
        let store = MemoryStore::new();
        store.put("feed-a", &mark("1")).await.unwrap();
        store.put("feed-a", &mark("2")).await.unwrap();
        store.put("feed-b", &mark("x")).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            store.get("feed-a").await.unwrap().unwrap().last_item_id.as_deref(),
            Some("2")
        );
        assert_eq!(store.record("feed-a").await.unwrap().created_at, 1);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing_fails_on_stream_error() {
        let good = serde_json::to_vec(&next_record(None, "u", &mark("a"), 1)).unwrap();
        let entries: Vec<std::result::Result<(String, Vec<u8>), String>> = vec![
            Ok(("rss/watermark/1".to_string(), good.clone())),
            Err("disk went away".to_string()),
        ];
        let err = collect_records(futures::stream::iter(entries)).await.unwrap_err();
        assert!(matches!(err, FeedError::Store(ref m) if m.contains("disk went away")));

        let entries: Vec<std::result::Result<(String, Vec<u8>), String>> = vec![
            Ok(("rss/watermark/1".to_string(), good)),
            Ok(("rss/watermark/2".to_string(), b"not json".to_vec())),
        ];
        let all = collect_records(futures::stream::iter(entries)).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("u"));
    }

    #[tokio::test]
    async fn test_cnidarium_store_roundtrip() {
        let (storage, dir) = crate::storage::scratch("store").await;
        let store = FeedStore::new(storage);

        assert!(store.get("https://example.com/rss").await.unwrap().is_none());
        store.put("https://example.com/rss", &mark("g1")).await.unwrap();
        store.put("https://example.com/rss", &mark("g2")).await.unwrap();
        store.put("https://example.org/rss", &mark("o1")).await.unwrap();

        let got = store.get("https://example.com/rss").await.unwrap().unwrap();
        assert_eq!(got, mark("g2"));

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("https://example.org/rss"));

        assert!(store.delete("https://example.org/rss").await.unwrap());
        assert!(!store.delete("https://example.org/rss").await.unwrap());
        assert!(store.get("https://example.org/rss").await.unwrap().is_none());

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
