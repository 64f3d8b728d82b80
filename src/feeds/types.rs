use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored marker of the most recently dispatched item of one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedWatermark {
    pub last_item_id: Option<String>,
    pub last_publish_date: Option<DateTime<Utc>>,
    pub last_title: Option<String>,
}

/// Persisted form of a watermark, one record per feed URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkRecord {
    pub feed_url: String,
    #[serde(default)]
    pub last_item_id: Option<String>,
    #[serde(default)]
    pub last_publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WatermarkRecord {
    pub fn watermark(&self) -> FeedWatermark {
        FeedWatermark {
            last_item_id: self.last_item_id.clone(),
            last_publish_date: self.last_publish_date,
            last_title: self.last_title.clone(),
        }
    }
}

/// An `<enclosure>` attached to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
}

/// Image hints carried by the feed document itself, in resolution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaHints {
    pub thumbnail: Option<String>,
    pub content: Option<String>,
    pub enclosure: Option<Enclosure>,
    pub image: Option<String>,
}

/// One entry of a fetched feed. Lives for a single cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub id: Option<String>,
    /// Publish date exactly as the feed wrote it.
    pub published: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub categories: Vec<String>,
    pub author: Option<String>,
    pub media: MediaHints,
}

impl FeedItem {
    /// Parsed publish date. `None` when absent or unparseable.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published.as_deref().and_then(parse_date)
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(untitled)")
    }
}

/// Channel-level details of a fetched feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub link: Option<String>,
}

/// Feed document after parsing.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub meta: FeedMeta,
    pub items: Vec<FeedItem>,
}

/// A configured feed: where to read it, how to label it, where to post it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub url: String,
    /// Explicit display name. Without one the feed's own title is used.
    pub name: Option<String>,
    pub channels: Vec<u64>,
}

impl FeedConfig {
    /// Short label for logs and command output.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// RFC 2822 first (RSS), then RFC 3339 (Atom-style dates inside RSS).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc2822() {
        let dt = parse_date("Tue, 12 May 2020 16:08:48 GMT").unwrap();
        assert_eq!(dt.to_rfc3339(), "2020-05-12T16:08:48+00:00");
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let dt = parse_date("2024-03-01T09:00:00+09:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_date("yesterday-ish").is_none());
        let item = FeedItem {
            published: Some("not a date".to_string()),
            ..Default::default()
        };
        assert!(item.published_at().is_none());
    }
}
