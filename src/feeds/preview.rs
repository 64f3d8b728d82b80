use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::error::{FeedError, Result};
use super::fetch::USER_AGENT;

/// Looks up the social-preview image of a linked page.
#[async_trait]
pub trait LinkPreview: Send + Sync {
    async fn preview_image(&self, page_url: &str) -> Result<Option<String>>;
}

pub struct HttpLinkPreview {
    client: reqwest::Client,
}

impl HttpLinkPreview {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkPreview for HttpLinkPreview {
    async fn preview_image(&self, page_url: &str) -> Result<Option<String>> {
        let resp = self.client.get(page_url).send().await?;
        if !resp.status().is_success() {
            return Err(FeedError::Fetch(format!(
                "HTTP {} from {}",
                resp.status(),
                page_url
            )));
        }
        let html = resp.text().await?;
        let found = find_preview_image(&html, page_url);
        debug!(page = page_url, image = ?found, "preview image lookup");
        Ok(found)
    }
}

/// Meta selectors in preference order.
const IMAGE_SELECTORS: [&str; 2] = [
    r#"meta[property="og:image"]"#,
    r#"meta[name="twitter:image"]"#,
];

/// First non-empty `og:image`, else `twitter:image`, resolved against the page URL.
pub fn find_preview_image(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    IMAGE_SELECTORS.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        document
            .select(&selector)
            .filter_map(|meta| meta.value().attr("content"))
            .map(str::trim)
            .find(|content| !content.is_empty())
            .and_then(|src| absolutize(src, page_url))
    })
}

/// Resolve a possibly relative image reference against the page URL.
fn absolutize(src: &str, page_url: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(src) {
        return Some(absolute.to_string());
    }
    let base = Url::parse(page_url).ok()?;
    base.join(src).ok().map(|u| u.to_string())
}
