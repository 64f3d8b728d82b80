mod roster;
mod rss;
mod verify;

use poise::serenity_prelude as serenity;
use tracing::warn;

use crate::state::{AppState, Context};

/// RSS feed relay
#[poise::command(slash_command, subcommands("rss::status", "rss::poll", "rss::reset"))]
pub async fn rss(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Student roster
#[poise::command(slash_command, subcommands("roster::lookup"))]
pub async fn roster(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Email verification
#[poise::command(slash_command, subcommands("verify::panel", "verify::email"))]
pub async fn verify(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Gateway events that are not slash commands: guild messages, component
/// interactions and modal submissions.
pub async fn handle_event(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if new_message.author.bot || new_message.guild_id.is_none() {
                return Ok(());
            }
            // One failing feature must not keep the other from seeing the message.
            if data.expand_links {
                let relayed =
                    crate::relay::relay_linked_message(ctx, &data.sink, new_message).await;
                if let Err(e) = relayed {
                    warn!(channel = %new_message.channel_id, "Link relay failed: {:#}", e);
                }
            }
            if let Some(chat) = &data.chat {
                if let Err(e) = chat.handle_message(ctx, new_message).await {
                    warn!(channel = %new_message.channel_id, "Chat bridge failed: {:#}", e);
                }
            }
        }
        serenity::FullEvent::InteractionCreate { interaction } => {
            if let Some(component) = interaction.as_message_component() {
                match component.data.custom_id.as_str() {
                    roster::MENU_ID => roster::handle_menu(ctx, component, data).await?,
                    verify::EMAIL_BUTTON | verify::CODE_BUTTON => {
                        verify::handle_button(ctx, component, data).await?
                    }
                    _ => {}
                }
            } else if let Some(modal) = interaction.as_modal_submit() {
                verify::handle_modal(ctx, modal, data).await?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Split text into Discord-safe pieces (max 1990 chars), preferring line
/// then word boundaries.
pub fn chunk_message(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut chunk_len = remaining.len().min(1990);
        while !remaining.is_char_boundary(chunk_len) {
            chunk_len -= 1;
        }
        let split_at = if chunk_len < remaining.len() {
            remaining[..chunk_len]
                .rfind('\n')
                .or_else(|| remaining[..chunk_len].rfind(' '))
                .map(|i| i + 1)
                .unwrap_or(chunk_len)
        } else {
            chunk_len
        };
        chunks.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    chunks
}

/// Uses ctx.say() for every chunk so follow-ups go through the interaction
/// webhook (no Send Messages permission required).
async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    for chunk in chunk_message(text) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

/// Replies with a refusal and returns false for non-admins.
async fn require_admin(ctx: &Context<'_>) -> Result<bool, anyhow::Error> {
    if ctx.data().is_admin(ctx.author().id.get()) {
        return Ok(true);
    }
    ctx.say("This command is admin-only.").await?;
    Ok(false)
}
