use std::time::Duration;

use async_trait::async_trait;
use rss::Channel;
use tracing::debug;

use super::error::{FeedError, Result};
use super::types::{Enclosure, FeedItem, FeedMeta, MediaHints, ParsedFeed};

pub const USER_AGENT: &str = concat!("feedrelay/", env!("CARGO_PKG_VERSION"));

/// Where feed documents come from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed>;
}

pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Fetch(format!("HTTP {} from {}", status, url)));
        }
        let body = resp.bytes().await?;
        debug!(url, size = body.len(), "feed document fetched");
        parse_feed(&body)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Feed descriptions are usually HTML; keep only the readable text.
fn plain_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 10_000)
        .unwrap_or_else(|_| html.to_string())
        .trim()
        .to_string()
}

/// First `<media:{name} url="...">` on the item.
fn media_url(item: &rss::Item, name: &str) -> Option<String> {
    let exts = item.extensions().get("media")?.get(name)?;
    exts.iter()
        .find_map(|ext| non_empty(ext.attrs().get("url").map(String::as_str)))
}

fn convert_item(item: &rss::Item) -> FeedItem {
    let author = non_empty(item.author()).or_else(|| {
        item.dublin_core_ext()
            .and_then(|dc| non_empty(dc.creators().first().map(String::as_str)))
    });

    let enclosure = item.enclosure().and_then(|enc| {
        non_empty(Some(enc.url())).map(|url| Enclosure {
            url,
            mime_type: enc.mime_type().trim().to_string(),
        })
    });

    FeedItem {
        id: non_empty(item.guid().map(|g| g.value())),
        published: non_empty(item.pub_date()),
        title: non_empty(item.title()),
        link: non_empty(item.link()),
        summary: item
            .description()
            .map(plain_text)
            .filter(|s| !s.is_empty()),
        categories: item
            .categories()
            .iter()
            .filter_map(|c| non_empty(Some(c.name())))
            .collect(),
        author,
        media: MediaHints {
            thumbnail: media_url(item, "thumbnail"),
            content: media_url(item, "content"),
            enclosure,
            image: item
                .itunes_ext()
                .and_then(|it| non_empty(it.image())),
        },
    }
}

/// Parse an RSS 2.0 document. Missing or malformed item fields become `None`.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let channel = Channel::read_from(bytes)?;
    Ok(ParsedFeed {
        meta: FeedMeta {
            title: non_empty(Some(channel.title())),
            link: non_empty(Some(channel.link())),
        },
        items: channel.items().iter().map(convert_item).collect(),
    })
}
