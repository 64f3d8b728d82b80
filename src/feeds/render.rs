use tracing::warn;
use url::Url;

use super::error::{FeedError, Result};
use super::preview::LinkPreview;
use super::types::{FeedConfig, FeedItem, FeedMeta};

pub const SUMMARY_LIMIT: usize = 500;
const TITLE_LIMIT: usize = 256;
const USERNAME_LIMIT: usize = 80;
const FOOTER: &str = "Delivered automatically via RSS";
pub const BUTTON_LABEL: &str = "Read article";

/// Rich part of a message: rendered as an embed by the Discord sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub title: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub metadata: Vec<String>,
    pub footer: String,
}

/// Everything needed to post one item to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub username: String,
    pub avatar_url: Option<String>,
    pub content: Option<String>,
    pub card: Option<Card>,
    pub link_button: Option<String>,
}

impl Payload {
    pub fn is_minimal(&self) -> bool {
        self.card.is_none()
    }
}

/// Cut to `max` chars; when cut, trailing whitespace goes and "..." is appended.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.trim().to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut.trim())
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// Favicon service URL for the feed's site.
pub fn avatar_url(feed: &FeedConfig, meta: &FeedMeta) -> Option<String> {
    let domain = host_of(&feed.url).or_else(|| meta.link.as_deref().and_then(host_of))?;
    Some(format!(
        "https://www.google.com/s2/favicons?domain={}&sz=128",
        domain
    ))
}

fn is_web_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Image for an item: thumbnail, media content, image enclosure, item image,
/// then the linked page's preview image. Lookup failures mean "no image".
pub async fn resolve_image(item: &FeedItem, preview: &dyn LinkPreview) -> Option<String> {
    let media = &item.media;
    let embedded = media
        .thumbnail
        .clone()
        .or_else(|| media.content.clone())
        .or_else(|| {
            media
                .enclosure
                .as_ref()
                .filter(|e| e.mime_type.starts_with("image/"))
                .map(|e| e.url.clone())
        })
        .or_else(|| media.image.clone());

    if let Some(url) = embedded.filter(|u| is_web_url(u)) {
        return Some(url);
    }

    let link = item.link.as_deref()?;
    match preview.preview_image(link).await {
        Ok(found) => found.filter(|u| is_web_url(u)),
        Err(e) => {
            warn!(link, "Preview image lookup failed: {}", e);
            None
        }
    }
}

fn metadata_lines(item: &FeedItem) -> Vec<String> {
    let mut lines = Vec::new();
    if !item.categories.is_empty() {
        lines.push(format!("📁 **Categories**: {}", item.categories.join(", ")));
    }
    if let Some(author) = &item.author {
        lines.push(format!("✍️ **Author**: {}", author));
    }
    if let Some(at) = item.published_at() {
        lines.push(format!(
            "📅 **Published**: {}",
            at.format("%Y-%m-%d %H:%M (%a)")
        ));
    }
    lines
}

/// Configured name, else the feed's own title, else its host.
fn username(feed: &FeedConfig, meta: &FeedMeta) -> String {
    let name = feed
        .name
        .clone()
        .or_else(|| meta.title.clone())
        .or_else(|| host_of(&feed.url))
        .unwrap_or_else(|| feed.url.clone());
    truncate_chars(&name, USERNAME_LIMIT)
}

/// Full message for an item.
pub async fn render(
    item: &FeedItem,
    feed: &FeedConfig,
    meta: &FeedMeta,
    preview: &dyn LinkPreview,
) -> Result<Payload> {
    if let Some(link) = &item.link {
        if !is_web_url(link) {
            return Err(FeedError::Render(format!("item link is not a web URL: {}", link)));
        }
    }

    let card = Card {
        title: truncate_chars(item.display_title(), TITLE_LIMIT),
        url: item.link.clone(),
        description: item
            .summary
            .as_deref()
            .map(|s| truncate_chars(s, SUMMARY_LIMIT))
            .filter(|s| !s.is_empty()),
        image_url: resolve_image(item, preview).await,
        metadata: metadata_lines(item),
        footer: FOOTER.to_string(),
    };

    Ok(Payload {
        username: username(feed, meta),
        avatar_url: avatar_url(feed, meta),
        content: None,
        card: Some(card),
        link_button: item.link.clone(),
    })
}

/// Title and link only. Used when the full message cannot be built or sent.
pub fn render_minimal(item: &FeedItem, feed: &FeedConfig, meta: &FeedMeta) -> Payload {
    let title = truncate_chars(item.display_title(), TITLE_LIMIT);
    let content = match &item.link {
        Some(link) => format!("**{}**\n{}", title, link),
        None => format!("**{}**", title),
    };
    Payload {
        username: username(feed, meta),
        avatar_url: None,
        content: Some(content),
        card: None,
        link_button: None,
    }
}
