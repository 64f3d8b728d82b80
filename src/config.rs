use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use crate::feeds::FeedConfig;

const DEFAULT_POLL_SECS: u64 = 600;
const DEFAULT_EMAIL_DOMAIN: &str = "s.salesio-sp.ac.jp";
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";

pub struct BotConfig {
    pub token: String,
    pub guild_id: Option<u64>,
    pub admin_ids: HashSet<u64>,
    pub data_dir: PathBuf,
    pub roster_path: PathBuf,
    pub webhook_name: String,
    pub poll_interval: Duration,
    pub feeds: Vec<FeedConfig>,
    pub expand_links: bool,
    pub chat: ChatConfig,
    pub verify: Option<VerifyConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatConfig {
    /// Channels whose messages (and threads) get model replies.
    pub channel_ids: HashSet<u64>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    pub role_id: u64,
    pub email_domain: String,
    pub smtp_host: String,
    pub email_user: String,
    pub email_pass: String,
}

impl BotConfig {
    /// Read everything from the environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = var("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context("DISCORD_TOKEN required")?;

        let guild_id = var("DISCORD_GUILD_ID").and_then(|s| s.trim().parse::<u64>().ok());

        let admin_ids = parse_ids(&var("ADMIN_USER_IDS").unwrap_or_default())
            .into_iter()
            .collect();

        let poll_secs = match var("RSS_POLL_INTERVAL_SECS") {
            None => DEFAULT_POLL_SECS,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    warn!(value = %raw, "Invalid RSS_POLL_INTERVAL_SECS, using default");
                    DEFAULT_POLL_SECS
                }
            },
        };

        Ok(Self {
            token,
            guild_id,
            admin_ids,
            data_dir: PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "./data/store".to_string())),
            roster_path: PathBuf::from(
                var("ROSTER_PATH").unwrap_or_else(|| "./data/student-data.json".to_string()),
            ),
            webhook_name: var("WEBHOOK_NAME")
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "feedrelay".to_string()),
            poll_interval: Duration::from_secs(poll_secs),
            feeds: feeds_from_lookup(&var),
            expand_links: var("EXPAND_MESSAGE_LINKS").map_or(true, |v| flag(&v)),
            chat: ChatConfig {
                channel_ids: parse_ids(&var("CHAT_CHANNEL_IDS").unwrap_or_default())
                    .into_iter()
                    .collect(),
                system_prompt: non_empty(var("CHAT_SYSTEM_PROMPT")),
            },
            verify: verify_from_lookup(&var),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Anything but an explicit off value counts as on.
fn flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Verification needs a role and a mail account; without them it stays off.
fn verify_from_lookup(var: &impl Fn(&str) -> Option<String>) -> Option<VerifyConfig> {
    let role = non_empty(var("VERIFY_ROLE_ID"));
    let user = non_empty(var("EMAIL_USER"));
    let pass = non_empty(var("EMAIL_PASS"));
    let (role, email_user, email_pass) = match (role, user, pass) {
        (Some(role), Some(user), Some(pass)) => (role, user, pass),
        (None, None, None) => return None,
        _ => {
            warn!("Email verification needs VERIFY_ROLE_ID, EMAIL_USER and EMAIL_PASS; disabled");
            return None;
        }
    };
    let Some(role_id) = role.parse::<u64>().ok().filter(|id| *id != 0) else {
        warn!(value = %role, "Invalid VERIFY_ROLE_ID, email verification disabled");
        return None;
    };
    Some(VerifyConfig {
        role_id,
        email_domain: non_empty(var("VERIFY_EMAIL_DOMAIN"))
            .unwrap_or_else(|| DEFAULT_EMAIL_DOMAIN.to_string()),
        smtp_host: non_empty(var("SMTP_HOST")).unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
        email_user,
        email_pass,
    })
}

/// Comma-separated non-zero ids; anything else is dropped with a warning.
fn parse_ids(raw: &str) -> Vec<u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<u64>() {
            Ok(id) if id != 0 => Some(id),
            _ => {
                warn!(value = s, "Ignoring invalid id");
                None
            }
        })
        .collect()
}

/// `RSS_URL_1`, `RSS_URL_2`, ... up to the first missing index.
fn feeds_from_lookup(var: &impl Fn(&str) -> Option<String>) -> Vec<FeedConfig> {
    let mut feeds = Vec::new();
    for n in 1.. {
        let Some(url) = var(&format!("RSS_URL_{}", n)) else {
            break;
        };
        let url = url.trim().to_string();
        if url.is_empty() {
            warn!(index = n, "RSS_URL is empty, skipping feed");
            continue;
        }

        let channels = parse_ids(&var(&format!("RSS_CHANNELS_{}", n)).unwrap_or_default());
        if channels.is_empty() {
            warn!(url = %url, "Feed has no destination channels");
        }

        // Without a name the webhook shows the feed's own title.
        let name = non_empty(var(&format!("RSS_NAME_{}", n)));

        feeds.push(FeedConfig {
            url,
            name,
            channels,
        });
    }
    feeds
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_token_required() {
        assert!(BotConfig::from_lookup(lookup(&[])).is_err());
        assert!(BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "  ")])).is_err());
    }

    #[test]
    fn test_defaults() {
        let cfg = BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "t")])).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(600));
        assert_eq!(cfg.data_dir, PathBuf::from("./data/store"));
        assert_eq!(cfg.webhook_name, "feedrelay");
        assert!(cfg.feeds.is_empty());
        assert!(cfg.guild_id.is_none());
        assert!(cfg.expand_links);
        assert_eq!(cfg.chat, ChatConfig::default());
        assert!(cfg.verify.is_none());
    }

    #[test]
    fn test_chat_and_link_settings() {
        let cfg = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "t"),
            ("CHAT_CHANNEL_IDS", "10, 20"),
            ("CHAT_SYSTEM_PROMPT", "  Answer briefly.  "),
            ("EXPAND_MESSAGE_LINKS", "off"),
        ]))
        .unwrap();
        assert!(!cfg.expand_links);
        assert_eq!(cfg.chat.channel_ids, HashSet::from([10, 20]));
        assert_eq!(cfg.chat.system_prompt.as_deref(), Some("Answer briefly."));
    }

    #[test]
    fn test_verification_needs_role_and_mail_account() {
        let partial = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "t"),
            ("VERIFY_ROLE_ID", "77"),
            ("EMAIL_USER", "bot@example.com"),
        ]))
        .unwrap();
        assert!(partial.verify.is_none());

        let bad_role = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "t"),
            ("VERIFY_ROLE_ID", "admins"),
            ("EMAIL_USER", "bot@example.com"),
            ("EMAIL_PASS", "secret"),
        ]))
        .unwrap();
        assert!(bad_role.verify.is_none());

        let full = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "t"),
            ("VERIFY_ROLE_ID", "77"),
            ("EMAIL_USER", "bot@example.com"),
            ("EMAIL_PASS", "secret"),
        ]))
        .unwrap();
        assert_eq!(
            full.verify,
            Some(VerifyConfig {
                role_id: 77,
                email_domain: "s.salesio-sp.ac.jp".to_string(),
                smtp_host: "smtp.gmail.com".to_string(),
                email_user: "bot@example.com".to_string(),
                email_pass: "secret".to_string(),
            })
        );
    }

    #[test]
    fn test_numbered_feeds_until_gap() {
        let cfg = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "t"),
            ("RSS_URL_1", "https://rss.example.com/a.xml"),
            ("RSS_CHANNELS_1", "111, 222,zero,0"),
            ("RSS_NAME_1", "Example A"),
            ("RSS_URL_2", "https://news.example.org/b.xml"),
            ("RSS_URL_4", "https://ignored.example.net/"),
            ("RSS_POLL_INTERVAL_SECS", "60"),
            ("ADMIN_USER_IDS", "5,6"),
        ]))
        .unwrap();

        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.admin_ids.len(), 2);
        assert_eq!(
            cfg.feeds,
            vec![
                FeedConfig {
                    url: "https://rss.example.com/a.xml".to_string(),
                    name: Some("Example A".to_string()),
                    channels: vec![111, 222],
                },
                FeedConfig {
                    url: "https://news.example.org/b.xml".to_string(),
                    name: None,
                    channels: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_bad_interval_falls_back() {
        let cfg = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "t"),
            ("RSS_POLL_INTERVAL_SECS", "soon"),
        ]))
        .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(600));
    }
}
