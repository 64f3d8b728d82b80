use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::assistant::ChatBridge;
use crate::feeds::discord::WebhookSink;
use crate::feeds::{Poller, WatermarkStore};
use crate::roster::Student;
use crate::session::SessionCache;
use crate::verify::store::EmailDirectory;
use crate::verify::Verifier;

pub struct AppState {
    pub store: Arc<dyn WatermarkStore>,
    pub poller: Arc<Poller>,
    pub sink: Arc<WebhookSink>,
    pub sessions: Arc<SessionCache<Vec<Student>>>,
    pub roster_path: PathBuf,
    pub admin_ids: HashSet<u64>,
    pub expand_links: bool,
    /// Present when chat channels are configured.
    pub chat: Option<Arc<ChatBridge>>,
    /// Present when the role and mail account are configured.
    pub verifier: Option<Arc<Verifier>>,
    pub emails: Arc<dyn EmailDirectory>,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
