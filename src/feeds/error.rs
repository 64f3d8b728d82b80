use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Fetch(err.to_string())
    }
}

impl From<rss::Error> for FeedError {
    fn from(err: rss::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Store(err.to_string())
    }
}

impl From<serenity::Error> for FeedError {
    fn from(err: serenity::Error) -> Self {
        FeedError::Delivery(err.to_string())
    }
}
