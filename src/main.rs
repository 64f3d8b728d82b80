mod assistant;
mod commands;
mod config;
mod feeds;
mod llm;
mod relay;
mod roster;
mod session;
mod state;
mod storage;
mod verify;

use std::sync::Arc;

use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use assistant::ChatBridge;
use config::BotConfig;
use feeds::discord::WebhookSink;
use feeds::fetch::HttpFeedSource;
use feeds::preview::HttpLinkPreview;
use feeds::{Dispatcher, FeedStore, Poller, WatermarkStore};
use llm::LlmClient;
use session::{SessionCache, SESSION_TTL, SWEEP_INTERVAL};
use state::AppState;
use verify::mailer::SmtpMailer;
use verify::store::{EmailDirectory, EmailStore};
use verify::{EmailPolicy, Verifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    // Load env
    let _ = dotenv::dotenv();
    let config = BotConfig::from_env()?;
    let guild_id = config.guild_id.map(serenity::GuildId::new);

    // Init storage; the relay cannot run without its watermarks.
    let storage = storage::open(&config.data_dir).await?;
    let store: Arc<dyn WatermarkStore> = Arc::new(FeedStore::new(storage.clone()));
    let emails: Arc<dyn EmailDirectory> = Arc::new(EmailStore::new(storage.clone()));
    info!("Store initialized at {:?}", config.data_dir);

    let source = Arc::new(HttpFeedSource::new()?);
    let preview = Arc::new(HttpLinkPreview::new()?);

    if !config.admin_ids.is_empty() {
        info!(count = config.admin_ids.len(), "Admin users configured");
    }
    for feed in &config.feeds {
        let channels = feed.channels.len();
        info!(feed = %feed.label(), url = %feed.url, channels, "Feed configured");
    }

    let sessions = Arc::new(SessionCache::new(SESSION_TTL));

    let chat = if config.chat.channel_ids.is_empty() {
        None
    } else {
        let llm = LlmClient::from_env()?;
        info!(
            model = llm.model(),
            channels = config.chat.channel_ids.len(),
            "Chat bridge enabled"
        );
        Some(Arc::new(ChatBridge::new(
            Arc::new(llm),
            config.chat.channel_ids.clone(),
            config.chat.system_prompt.clone(),
        )))
    };

    let verifier = match &config.verify {
        Some(v) => {
            let mailer = SmtpMailer::new(&v.smtp_host, &v.email_user, &v.email_pass)?;
            info!(domain = %v.email_domain, smtp = %v.smtp_host, "Email verification enabled");
            Some(Arc::new(Verifier::new(
                EmailPolicy::new(v.email_domain.as_str()),
                Arc::new(mailer),
                emails.clone(),
                v.role_id,
            )))
        }
        None => None,
    };

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_WEBHOOKS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let BotConfig {
        token,
        admin_ids,
        roster_path,
        webhook_name,
        poll_interval,
        feeds,
        expand_links,
        ..
    } = config;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::rss(), commands::roster(), commands::verify()],
            event_handler: |ctx, event, _framework, data| {
                Box::pin(commands::handle_event(ctx, event, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);

                let commands = &framework.options().commands;
                info!("Registering {} top-level command(s):", commands.len());
                for cmd in commands {
                    info!("  /{} ({} subcommands)", cmd.name, cmd.subcommands.len());
                    for sub in &cmd.subcommands {
                        info!("    /{} {}", cmd.name, sub.name);
                    }
                }

                if let Some(gid) = guild_id {
                    info!("Registering to guild {} (instant)", gid);
                    poise::builtins::register_in_guild(ctx, &framework.options().commands, gid)
                        .await?;
                } else {
                    info!("Registering globally (up to 1 hour delay)");
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                }

                // Webhook delivery needs the gateway's HTTP client, so the
                // poller starts only once we are connected.
                let sink = Arc::new(WebhookSink::new(ctx.http.clone(), webhook_name));
                let dispatcher = Dispatcher::new(sink.clone(), preview);
                let poller = Arc::new(Poller::new(
                    feeds,
                    source,
                    store.clone(),
                    dispatcher,
                    poll_interval,
                ));
                poller.clone().spawn();
                sessions.clone().spawn_sweeper(SWEEP_INTERVAL);
                if let Some(verifier) = &verifier {
                    verifier.pending().spawn_sweeper(SWEEP_INTERVAL);
                }

                Ok(AppState {
                    store,
                    poller,
                    sink,
                    sessions,
                    roster_path,
                    admin_ids,
                    expand_links,
                    chat,
                    verifier,
                    emails,
                })
            })
        })
        .build();

    info!("Starting feed relay bot...");

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    drop(client);
    storage.release().await;
    info!("Storage released");

    Ok(())
}
