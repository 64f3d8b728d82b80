//! AI chat bridge: messages in watched channels get a model reply in a thread.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use poise::serenity_prelude as serenity;
use serenity::{AutoArchiveDuration, Channel, ChannelType, CreateThread, EditMessage};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::commands::chunk_message;
use crate::llm::{ChatModel, Message};

pub const THINKING: &str = "🤔 Thinking...";
const THREAD_NAME_CHARS: usize = 10;
/// Messages kept per user, oldest dropped first.
const HISTORY_LIMIT: usize = 20;

pub struct ChatBridge {
    model: Arc<dyn ChatModel>,
    channels: HashSet<u64>,
    system_prompt: Option<String>,
    histories: Mutex<HashMap<u64, Vec<Message>>>,
}

/// Thread title: the first few characters of the prompt.
pub fn thread_name(prompt: &str, username: &str) -> String {
    let name: String = prompt.trim().chars().take(THREAD_NAME_CHARS).collect();
    if name.trim().is_empty() {
        format!("{}'s chat", username)
    } else {
        name
    }
}

impl ChatBridge {
    pub fn new(
        model: Arc<dyn ChatModel>,
        channels: HashSet<u64>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            model,
            channels,
            system_prompt,
            histories: Mutex::new(HashMap::new()),
        }
    }

    pub fn watches(&self, channel_id: u64) -> bool {
        self.channels.contains(&channel_id)
    }

    /// A reply continues the user's conversation; anything else starts over.
    async fn begin_turn(&self, user_id: u64, prompt: &str, continues: bool) -> Vec<Message> {
        let mut histories = self.histories.lock().await;
        let history = histories.entry(user_id).or_default();
        if !continues {
            history.clear();
        }
        history.push(Message::user(prompt));
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }

        let mut conversation = Vec::with_capacity(history.len() + 1);
        if let Some(system) = &self.system_prompt {
            conversation.push(Message::system(system.as_str()));
        }
        conversation.extend(history.iter().cloned());
        conversation
    }

    /// Ask the model and remember its answer as part of the conversation.
    pub async fn answer(
        &self,
        user_id: u64,
        prompt: &str,
        continues: bool,
    ) -> anyhow::Result<String> {
        let conversation = self.begin_turn(user_id, prompt, continues).await;
        debug!(user_id, turns = conversation.len(), "chat request");
        let reply = self.model.chat(&conversation).await?;
        self.histories
            .lock()
            .await
            .entry(user_id)
            .or_default()
            .push(Message::assistant(reply.as_str()));
        Ok(reply)
    }

    /// Reply to a guild message if it was posted in a watched channel or in
    /// a thread under one.
    pub async fn handle_message(
        &self,
        ctx: &serenity::Context,
        message: &serenity::Message,
    ) -> anyhow::Result<()> {
        let prompt = message.content.trim();
        if prompt.is_empty() || self.channels.is_empty() {
            return Ok(());
        }

        let Channel::Guild(channel) = message.channel_id.to_channel(ctx).await? else {
            return Ok(());
        };
        let in_thread = matches!(
            channel.kind,
            ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
        );
        let home = if in_thread {
            channel.parent_id
        } else {
            Some(channel.id)
        };
        if !home.is_some_and(|id| self.watches(id.get())) {
            return Ok(());
        }

        let thread = if in_thread {
            channel.id
        } else {
            let name = thread_name(prompt, &message.author.name);
            let builder =
                CreateThread::new(name).auto_archive_duration(AutoArchiveDuration::OneHour);
            message
                .channel_id
                .create_thread_from_message(&ctx.http, message.id, builder)
                .await?
                .id
        };
        info!(user = %message.author.name, thread = %thread, "Chat prompt received");

        let mut pending = thread.say(&ctx.http, THINKING).await?;
        let continues = message.message_reference.is_some();
        let reply = match self.answer(message.author.id.get(), prompt, continues).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(thread = %thread, "Chat reply failed: {:#}", e);
                format!("Something went wrong while generating a reply.```{}```", e)
            }
        };

        let mut chunks = chunk_message(&reply).into_iter();
        if let Some(first) = chunks.next() {
            pending.edit(ctx, EditMessage::new().content(first)).await?;
        }
        for chunk in chunks {
            thread.say(&ctx.http, chunk).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    /// Echoes the number of messages it saw; remembers the last conversation.
    #[derive(Default)]
    struct EchoModel {
        seen: Mutex<Vec<Message>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn chat(&self, messages: &[Message]) -> anyhow::Result<String> {
            *self.seen.lock().await = messages.to_vec();
            if self.fail {
                anyhow::bail!("model offline");
            }
            Ok(format!("reply to {} messages", messages.len()))
        }
    }

    fn bridge(model: Arc<EchoModel>, system: Option<&str>) -> ChatBridge {
        ChatBridge::new(model, HashSet::from([10]), system.map(str::to_string))
    }

    #[test]
    fn test_thread_name_uses_prompt_prefix() {
        assert_eq!(thread_name("What is an RSS watermark?", "hana"), "What is an");
        assert_eq!(thread_name("競馬の予想を教えてください", "hana"), "競馬の予想を教えてく");
        assert_eq!(thread_name("   ", "hana"), "hana's chat");
    }

    #[tokio::test]
    async fn test_reply_continues_history() {
        let model = Arc::new(EchoModel::default());
        let chat = bridge(model.clone(), Some("Be brief."));

        chat.answer(1, "first", false).await.unwrap();
        chat.answer(1, "second", true).await.unwrap();

        let seen = model.seen.lock().await.clone();
        let roles: Vec<&str> = seen.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(seen[0].content, "Be brief.");
        assert_eq!(seen[3].content, "second");
    }

    #[tokio::test]
    async fn test_new_message_resets_history() {
        let model = Arc::new(EchoModel::default());
        let chat = bridge(model.clone(), None);

        chat.answer(1, "first", false).await.unwrap();
        chat.answer(2, "other user", false).await.unwrap();
        chat.answer(1, "fresh start", false).await.unwrap();

        assert_eq!(*model.seen.lock().await, vec![Message::user("fresh start")]);
    }

    #[tokio::test]
    async fn test_failed_reply_is_not_remembered() {
        let model = Arc::new(EchoModel {
            fail: true,
            ..Default::default()
        });
        let chat = bridge(model.clone(), None);
        assert!(chat.answer(1, "hello", false).await.is_err());
        assert!(chat.answer(1, "again", true).await.is_err());
        let seen = model.seen.lock().await.clone();
        assert_eq!(seen, vec![Message::user("hello"), Message::user("again")]);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let model = Arc::new(EchoModel::default());
        let chat = bridge(model.clone(), None);
        chat.answer(1, "start", false).await.unwrap();
        for n in 0..30 {
            chat.answer(1, &format!("turn {}", n), true).await.unwrap();
        }
        let seen = model.seen.lock().await.clone();
        assert_eq!(seen.len(), HISTORY_LIMIT);
        assert_eq!(seen.last().map(|m| m.content.as_str()), Some("turn 29"));
        assert!(chat.watches(10) && !chat.watches(11));
    }
}
