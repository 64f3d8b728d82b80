use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use serenity::{
    Channel, ChannelId, ChannelType, CreateActionRow, CreateButton, CreateEmbed,
    CreateEmbedFooter, CreateWebhook, ExecuteWebhook, Http, Webhook,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::dispatch::DeliverySink;
use super::error::{FeedError, Result};
use super::render::{truncate_chars, Card, Payload, BUTTON_LABEL};

const FIELD_LIMIT: usize = 1024;

/// Where to post for a configured channel: the webhook, plus the thread when
/// the channel is a thread (webhooks live on the parent channel).
#[derive(Clone)]
struct Route {
    webhook: Webhook,
    thread: Option<ChannelId>,
}

/// Delivers payloads through channel webhooks, creating one when missing.
pub struct WebhookSink {
    http: Arc<Http>,
    webhook_name: String,
    routes: RwLock<HashMap<u64, Route>>,
}

impl WebhookSink {
    pub fn new(http: Arc<Http>, webhook_name: impl Into<String>) -> Self {
        Self {
            http,
            webhook_name: webhook_name.into(),
            routes: RwLock::new(HashMap::new()),
        }
    }

    async fn route(&self, channel_id: u64) -> Result<Route> {
        if let Some(route) = self.routes.read().await.get(&channel_id) {
            return Ok(route.clone());
        }

        if channel_id == 0 {
            return Err(FeedError::Delivery("channel id 0 is invalid".to_string()));
        }
        let target = ChannelId::new(channel_id);
        let channel = target.to_channel(self.http.as_ref()).await?;
        let Channel::Guild(guild_channel) = channel else {
            return Err(FeedError::Delivery(format!(
                "channel {} is not a guild channel",
                channel_id
            )));
        };

        let is_thread = matches!(
            guild_channel.kind,
            ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
        );
        let (host, thread) = if is_thread {
            let parent = guild_channel.parent_id.ok_or_else(|| {
                FeedError::Delivery(format!("thread {} has no parent channel", channel_id))
            })?;
            (parent, Some(target))
        } else {
            (target, None)
        };

        // Only webhooks with a token can be executed by us.
        let existing = host
            .webhooks(self.http.as_ref())
            .await?
            .into_iter()
            .find(|w| w.token.is_some());
        let webhook = match existing {
            Some(webhook) => webhook,
            None => {
                let created = host
                    .create_webhook(self.http.as_ref(), CreateWebhook::new(&self.webhook_name))
                    .await?;
                info!(channel = %host, "Created webhook");
                created
            }
        };

        let route = Route { webhook, thread };
        self.routes.write().await.insert(channel_id, route.clone());
        Ok(route)
    }
}

fn build_embed(card: &Card) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&card.title)
        .footer(CreateEmbedFooter::new(&card.footer));
    if let Some(url) = &card.url {
        embed = embed.url(url);
    }
    if let Some(description) = &card.description {
        embed = embed.description(description);
    }
    if let Some(image) = &card.image_url {
        embed = embed.image(image);
    }
    if !card.metadata.is_empty() {
        embed = embed.field(
            "Details",
            truncate_chars(&card.metadata.join("\n"), FIELD_LIMIT - 3),
            false,
        );
    }
    embed
}

/// Translate a payload into the webhook request body.
pub fn build_message(payload: &Payload) -> ExecuteWebhook {
    let mut message = ExecuteWebhook::new().username(&payload.username);
    if let Some(avatar) = &payload.avatar_url {
        message = message.avatar_url(avatar);
    }
    if let Some(content) = &payload.content {
        message = message.content(content);
    }
    if let Some(card) = &payload.card {
        message = message.embed(build_embed(card));
    }
    if let Some(link) = &payload.link_button {
        let button = CreateButton::new_link(link).label(BUTTON_LABEL).emoji('🔗');
        message = message.components(vec![CreateActionRow::Buttons(vec![button])]);
    }
    message
}

impl WebhookSink {
    /// Post any webhook message to a channel or thread.
    pub async fn execute(&self, channel_id: u64, message: ExecuteWebhook) -> Result<()> {
        let route = self.route(channel_id).await?;
        let message = match route.thread {
            Some(thread) => message.in_thread(thread),
            None => message,
        };

        if let Err(e) = route.webhook.execute(self.http.as_ref(), false, message).await {
            // The webhook may have been deleted; resolve it again next time.
            self.routes.write().await.remove(&channel_id);
            return Err(e.into());
        }
        debug!(channel = channel_id, "webhook executed");
        Ok(())
    }
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(&self, channel_id: u64, payload: &Payload) -> Result<()> {
        self.execute(channel_id, build_message(payload)).await
    }
}
