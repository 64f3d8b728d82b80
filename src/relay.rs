//! Discord message-link expansion: a posted link to a message in the same
//! server is answered with a copy of that message, sent through the channel
//! webhook under the original author's name and avatar.

use poise::serenity_prelude as serenity;
use serenity::{
    Channel, ChannelId, CreateAllowedMentions, CreateEmbed, ExecuteWebhook, MessageFlags,
    MessageId, StickerFormatType,
};
use tracing::{debug, info};
use url::Url;

use crate::feeds::discord::WebhookSink;
use crate::feeds::render::truncate_chars;

const LINK_HOSTS: [&str; 6] = [
    "discord.com",
    "canary.discord.com",
    "ptb.discord.com",
    "discordapp.com",
    "canary.discordapp.com",
    "ptb.discordapp.com",
];
const CONTENT_LIMIT: usize = 1990;
const USERNAME_LIMIT: usize = 77;
const EMBED_LIMIT: usize = 10;
const STICKER_COLOUR: u32 = 0x313338;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLink {
    pub guild: u64,
    pub channel: u64,
    pub message: u64,
}

fn parse_id(segment: &str) -> Option<u64> {
    segment.parse::<u64>().ok().filter(|id| *id != 0)
}

fn parse_link(candidate: &str) -> Option<MessageLink> {
    let url = Url::parse(candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") || !LINK_HOSTS.contains(&url.host_str()?) {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let ["channels", guild, channel, message] = segments.as_slice() else {
        return None;
    };
    Some(MessageLink {
        guild: parse_id(guild)?,
        channel: parse_id(channel)?,
        message: parse_id(message)?,
    })
}

/// First message link in the text. Links may be wrapped in `<...>` or markdown.
pub fn find_message_link(content: &str) -> Option<MessageLink> {
    content
        .split(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '(' | ')' | '[' | ']'))
        .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
        .find_map(parse_link)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StickerView {
    Image(String),
    Unsupported,
}

/// What gets re-posted, independent of the gateway types.
#[derive(Debug, Clone, Default)]
pub struct Relayed {
    pub username: String,
    pub avatar_url: Option<String>,
    pub content: String,
    pub embeds: Vec<CreateEmbed>,
    /// Attachment URL and whether it was marked as a spoiler.
    pub attachments: Vec<(String, bool)>,
    pub sticker: Option<StickerView>,
}

impl Relayed {
    async fn from_message(ctx: &serenity::Context, linked: &serenity::Message) -> Self {
        let username = match linked.author_nick(ctx).await {
            Some(nick) => nick,
            None => linked
                .author
                .global_name
                .clone()
                .unwrap_or_else(|| linked.author.name.clone()),
        };
        let sticker = linked.sticker_items.first().map(|s| match s.format_type {
            StickerFormatType::Lottie => StickerView::Unsupported,
            _ => s.image_url().map_or(StickerView::Unsupported, StickerView::Image),
        });
        Self {
            username,
            avatar_url: Some(linked.author.face()),
            content: linked.content.clone(),
            embeds: linked.embeds.iter().cloned().map(CreateEmbed::from).collect(),
            attachments: linked
                .attachments
                .iter()
                .map(|a| (a.url.clone(), a.filename.starts_with("SPOILER_")))
                .collect(),
            sticker,
        }
    }
}

/// The webhook body for a relayed message, or `None` when there is nothing to show.
/// Mentions are never pinged and the post is sent silently.
pub fn build_relay_message(relayed: &Relayed) -> Option<ExecuteWebhook> {
    let mut lines = Vec::new();
    if !relayed.content.trim().is_empty() {
        lines.push(relayed.content.clone());
    }
    for (url, spoiler) in &relayed.attachments {
        lines.push(if *spoiler {
            format!("||{}||", url)
        } else {
            url.clone()
        });
    }
    let content = truncate_chars(&lines.join("\n"), CONTENT_LIMIT);

    let mut embeds = relayed.embeds.clone();
    match &relayed.sticker {
        Some(StickerView::Image(url)) => embeds.push(
            CreateEmbed::new()
                .title("Sticker")
                .colour(STICKER_COLOUR)
                .image(url),
        ),
        Some(StickerView::Unsupported) => embeds.push(
            CreateEmbed::new()
                .colour(STICKER_COLOUR)
                .description("This sticker format cannot be shown."),
        ),
        None => {}
    }
    embeds.truncate(EMBED_LIMIT);

    if content.is_empty() && embeds.is_empty() {
        return None;
    }

    let mut message = ExecuteWebhook::new()
        .username(truncate_chars(&relayed.username, USERNAME_LIMIT))
        .allowed_mentions(CreateAllowedMentions::new())
        .flags(MessageFlags::SUPPRESS_NOTIFICATIONS)
        .embeds(embeds);
    if let Some(avatar) = &relayed.avatar_url {
        message = message.avatar_url(avatar);
    }
    if !content.is_empty() {
        message = message.content(content);
    }
    Some(message)
}

/// Expand the first message link in `message`, if it points into the same server.
/// Returns whether anything was posted.
pub async fn relay_linked_message(
    ctx: &serenity::Context,
    sink: &WebhookSink,
    message: &serenity::Message,
) -> anyhow::Result<bool> {
    let Some(guild_id) = message.guild_id else {
        return Ok(false);
    };
    let Some(link) = find_message_link(&message.content) else {
        return Ok(false);
    };
    if link.guild != guild_id.get() {
        debug!(guild = link.guild, "Ignoring link to another server");
        return Ok(false);
    }

    let source = ChannelId::new(link.channel);
    let Channel::Guild(source_channel) = source.to_channel(ctx).await? else {
        return Ok(false);
    };
    // The link's guild segment is user-supplied; trust the channel's own guild.
    if source_channel.guild_id != guild_id {
        debug!(channel = link.channel, "Linked channel belongs to another server");
        return Ok(false);
    }

    let linked = source.message(ctx, MessageId::new(link.message)).await?;
    let relayed = Relayed::from_message(ctx, &linked).await;
    let Some(body) = build_relay_message(&relayed) else {
        return Ok(false);
    };
    sink.execute(message.channel_id.get(), body).await?;
    info!(
        from = %source,
        to = %message.channel_id,
        message = link.message,
        "Relayed linked message"
    );
    Ok(true)
}
