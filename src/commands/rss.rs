use std::fmt::Write;

use tracing::info;

use super::{require_admin, send_chunked};
use crate::feeds::{CycleReport, CycleStatus};
use crate::state::Context;

/// Show configured feeds and where each one left off
#[poise::command(slash_command, guild_only)]
pub async fn status(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let mut records = ctx.data().store.get_all().await?;
    let feeds = ctx.data().poller.feeds();

    if feeds.is_empty() && records.is_empty() {
        ctx.say("No RSS feeds configured.").await?;
        return Ok(());
    }

    let mut out = format!("**RSS feeds ({}):**\n", feeds.len());
    for feed in feeds {
        let channels = if feed.channels.is_empty() {
            "none".to_string()
        } else {
            feed.channels
                .iter()
                .map(|id| format!("<#{}>", id))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let _ = writeln!(out, "- **{}** <{}>\n  channels: {}", feed.label(), feed.url, channels);

        match records.remove(&feed.url) {
            Some(record) => {
                let title = record.last_title.as_deref().unwrap_or("(untitled)");
                let published = record
                    .last_publish_date
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "no date".to_string());
                let updated = chrono::DateTime::from_timestamp(record.updated_at, 0)
                    .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let id = record.last_item_id.as_deref().unwrap_or("no id");
                let _ = writeln!(
                    out,
                    "  last: {} ({}) `{}`, updated {}",
                    title, published, id, updated
                );
            }
            None => {
                let _ = writeln!(out, "  last: nothing delivered yet");
            }
        }
    }

    // Watermarks for feeds that were removed from the configuration.
    if !records.is_empty() {
        let _ = writeln!(out, "\n**Stored but not configured ({}):**", records.len());
        for url in records.keys() {
            let _ = writeln!(out, "- <{}>", url);
        }
    }

    send_chunked(&ctx, &out).await
}

/// Poll every feed now (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn poll(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    if !require_admin(&ctx).await? {
        return Ok(());
    }
    ctx.defer().await?;

    info!(user = %ctx.author().name, "Manual RSS poll requested");
    let reports = ctx.data().poller.run_once().await;
    if reports.is_empty() {
        ctx.say("No RSS feeds configured.").await?;
        return Ok(());
    }

    let mut out = String::from("**Poll results:**\n");
    for report in &reports {
        let _ = writeln!(out, "{}", report_line(report));
    }
    send_chunked(&ctx, &out).await
}

/// Forget a feed's watermark so it starts over (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn reset(
    ctx: Context<'_>,
    #[description = "Feed URL"] url: String,
) -> Result<(), anyhow::Error> {
    if !require_admin(&ctx).await? {
        return Ok(());
    }

    let url = url.trim();
    if ctx.data().store.delete(url).await? {
        info!(url = %url, user = %ctx.author().name, "Watermark reset");
        ctx.say(format!(
            "Watermark for <{}> cleared. The next poll delivers its current items again.",
            url
        ))
        .await?;
    } else {
        ctx.say(format!("No watermark stored for <{}>.", url)).await?;
    }
    Ok(())
}

fn report_line(report: &CycleReport) -> String {
    match &report.status {
        CycleStatus::Completed => format!(
            "- **{}**: {} fetched, {} new, {} delivered, {} failed",
            report.feed,
            report.fetched,
            report.new_items,
            report.deliveries,
            report.failed_deliveries
        ),
        CycleStatus::Skipped => {
            format!("- **{}**: skipped, a poll is already running", report.feed)
        }
        CycleStatus::FetchFailed(e) => format!("- **{}**: fetch failed: {}", report.feed, e),
        CycleStatus::StoreWriteFailed(e) => format!(
            "- **{}**: {} delivered but the watermark was not saved: {}",
            report.feed, report.deliveries, e
        ),
    }
}
