//! RSS feed relay: poll feeds, keep a per-feed watermark, post new items to
//! Discord channels through webhooks.

pub mod dedup;
pub mod discord;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod poller;
pub mod preview;
pub mod render;
pub mod store;
pub mod types;

pub use dispatch::Dispatcher;
pub use poller::{CycleReport, CycleStatus, Poller};
pub use store::{FeedStore, WatermarkStore};
pub use types::FeedConfig;
