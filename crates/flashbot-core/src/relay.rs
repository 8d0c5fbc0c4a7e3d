use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    config::Config,
    context::ContextStore,
    dedup::SeenUpdates,
    domain::Role,
    history::ChatHistory,
    messaging::{
        outbox::Outbox,
        port::MessagingPort,
        types::{ChatAction, InboundMessage},
    },
    model::ChatModel,
    utils::truncate_text,
};

const TEXT_ONLY_APOLOGY: &str =
    "Sorry, I can only process text messages. The owner will assist you shortly.";
const ERROR_APOLOGY: &str =
    "Oops, something went wrong! The owner will assist you shortly.";

/// The webhook relay: one inbound message in, at most one reply out.
///
/// A linear request/response flow with no persistence and no retries. All
/// bookkeeping (history, dedup, learned context) is in-memory and bounded.
pub struct RelayService {
    cfg: Arc<Config>,
    model: Arc<dyn ChatModel>,
    messenger: Arc<dyn MessagingPort>,
    outbox: Arc<Outbox>,
    context: ContextStore,
    history: Mutex<ChatHistory>,
    seen: Mutex<SeenUpdates>,
}

impl RelayService {
    pub fn new(
        cfg: Arc<Config>,
        model: Arc<dyn ChatModel>,
        messenger: Arc<dyn MessagingPort>,
        outbox: Arc<Outbox>,
        context: ContextStore,
    ) -> Self {
        let history = Mutex::new(ChatHistory::new(cfg.history_limit));
        let seen = Mutex::new(SeenUpdates::new(cfg.dedup_capacity));
        Self {
            cfg,
            model,
            messenger,
            outbox,
            context,
            history,
            seen,
        }
    }

    pub async fn handle_message(&self, msg: InboundMessage) {
        // Telegram re-delivers updates when the listener answers slowly.
        if !self.seen.lock().await.insert(msg.message_ref()) {
            tracing::debug!(
                "skipping already processed message {} in chat {}",
                msg.message_id.0,
                msg.chat_id.0
            );
            return;
        }

        tracing::info!(
            "message {} from user {} in chat {}",
            msg.message_id.0,
            msg.sender.0,
            msg.chat_id.0
        );

        let text = msg
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let Some(text) = text else {
            self.outbox.enqueue(msg.chat_id, TEXT_ONLY_APOLOGY).await;
            self.outbox.flush().await;
            return;
        };

        // Owner messages are never answered; they teach the bot.
        if msg.sender.0 == self.cfg.owner_chat_id {
            tracing::debug!("learning from owner message in chat {}", msg.chat_id.0);
            self.history
                .lock()
                .await
                .record(msg.chat_id, Role::User, &text);
            self.context.learn_from_owner(&text).await;
            return;
        }

        // Telegram replays queued updates after downtime; drop old ones.
        let age = Utc::now().signed_duration_since(msg.sent_at);
        if age.num_seconds() > self.cfg.stale_cutoff.as_secs() as i64 {
            tracing::debug!("ignoring stale message from chat {}", msg.chat_id.0);
            return;
        }

        if text.starts_with("/start") {
            let name = msg.first_name.as_deref().unwrap_or("there");
            let welcome = format!(
                "Hi {name}! I'm your support bot, powered by Gemini. How can I help you today?"
            );
            self.history
                .lock()
                .await
                .record(msg.chat_id, Role::Bot, &welcome);
            self.outbox.enqueue(msg.chat_id, &welcome).await;
            self.outbox.flush().await;
            return;
        }

        self.history
            .lock()
            .await
            .record(msg.chat_id, Role::User, &text);

        let caps = self.messenger.capabilities();
        if caps.supports_chat_actions {
            if let Err(e) = self
                .messenger
                .send_chat_action(msg.chat_id, ChatAction::Typing)
                .await
            {
                tracing::debug!("typing action failed for chat {}: {e}", msg.chat_id.0);
            }
        }

        let prompt = {
            let preamble = self.context.preamble().await;
            let transcript = self.history.lock().await.transcript(msg.chat_id);
            build_prompt(&preamble, &transcript, &text)
        };

        match self.model.generate(&prompt).await {
            Ok(reply) => {
                // Leave room for the ellipsis the truncation appends.
                let reply = truncate_text(&reply, caps.max_message_len.saturating_sub(3));
                self.history
                    .lock()
                    .await
                    .record(msg.chat_id, Role::Bot, &reply);
                self.outbox.enqueue(msg.chat_id, &reply).await;
            }
            Err(e) => {
                tracing::error!(
                    "model {} failed for chat {}: {e}",
                    self.model.model_id(),
                    msg.chat_id.0
                );
                self.outbox
                    .notify_owner(&format!(
                        "Error handling message from chat {}: {e}",
                        msg.chat_id.0
                    ))
                    .await;
                self.outbox.enqueue(msg.chat_id, ERROR_APOLOGY).await;
            }
        }

        self.outbox.flush().await;
    }
}

fn build_prompt(preamble: &str, transcript: &str, question: &str) -> String {
    format!("{preamble}\n\nChat History:\n{transcript}\n\nUser question: {question}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        domain::{ChatId, MessageId, MessageRef, UserId},
        errors::Error,
        messaging::{outbox::OutboxConfig, types::MessagingCapabilities},
        Result,
    };

    const OWNER: i64 = 99;

    struct RecordingPort {
        sent: Mutex<Vec<(i64, String)>>,
        actions: Mutex<Vec<i64>>,
    }

    impl RecordingPort {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                actions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessagingPort for RecordingPort {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_chat_actions: true,
                max_message_len: 4096,
            }
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            self.sent.lock().await.push((chat_id.0, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn send_chat_action(&self, chat_id: ChatId, _action: ChatAction) -> Result<()> {
            self.actions.lock().await.push(chat_id.0);
            Ok(())
        }
    }

    struct ScriptedModel {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_id(&self) -> &str {
            "test-model"
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().await.push(prompt.to_string());
            self.reply
                .clone()
                .ok_or_else(|| Error::Model("api unreachable".to_string()))
        }
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            telegram_token: "token".to_string(),
            gemini_api_key: "key".to_string(),
            owner_chat_id: OWNER,
            webhook_url: url::Url::parse("https://bot.example/webhook").unwrap(),
            port: 8443,
            gemini_model: "gemini-1.5-flash".to_string(),
            model_timeout: Duration::from_secs(10),
            tunnel_command: None,
            tunnel_startup_timeout: Duration::from_secs(30),
            context_file: "context.txt".into(),
            bot_log_path: "bot.log".into(),
            tunnel_log_path: "tunnel.log".into(),
            pid_file: "/tmp/flashbot-test.pid".into(),
            history_limit: 5,
            dedup_capacity: 16,
            stale_cutoff: Duration::from_secs(60),
            reply_delay: Duration::ZERO,
            per_chat_min_interval: Duration::ZERO,
            outbox_capacity: 10,
        })
    }

    fn relay_with(
        model: Arc<ScriptedModel>,
        port: Arc<RecordingPort>,
    ) -> RelayService {
        let cfg = test_config();
        let outbox = Arc::new(Outbox::new(
            port.clone(),
            OutboxConfig {
                reply_delay: Duration::ZERO,
                per_chat_min_interval: Duration::ZERO,
                max_queue: 10,
            },
            ChatId(OWNER),
        ));
        RelayService::new(
            cfg,
            model,
            port,
            outbox,
            ContextStore::with_persona("You are the support persona.".to_string()),
        )
    }

    fn inbound(chat: i64, msg_id: i32, sender: i64, text: Option<&str>) -> InboundMessage {
        inbound_at(chat, msg_id, sender, text, Utc::now())
    }

    fn inbound_at(
        chat: i64,
        msg_id: i32,
        sender: i64,
        text: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> InboundMessage {
        InboundMessage {
            chat_id: ChatId(chat),
            message_id: MessageId(msg_id),
            sender: UserId(sender),
            first_name: Some("Dmitri".to_string()),
            text: text.map(|t| t.to_string()),
            sent_at,
        }
    }

    #[tokio::test]
    async fn relays_text_to_model_and_replies() {
        let model = Arc::new(ScriptedModel::replying("the answer"));
        let port = Arc::new(RecordingPort::new());
        let relay = relay_with(model.clone(), port.clone());

        relay.handle_message(inbound(1, 10, 42, Some("hello"))).await;

        let sent = port.sent.lock().await.clone();
        assert_eq!(sent, vec![(1, "the answer".to_string())]);

        let prompts = model.prompts.lock().await.clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("You are the support persona."));
        assert!(prompts[0].contains("Chat History:\nUSER: hello"));
        assert!(prompts[0].ends_with("User question: hello"));

        // A typing indicator preceded the model call.
        assert_eq!(port.actions.lock().await.clone(), vec![1]);
    }

    #[tokio::test]
    async fn redelivered_update_is_processed_once() {
        let model = Arc::new(ScriptedModel::replying("ok"));
        let port = Arc::new(RecordingPort::new());
        let relay = relay_with(model.clone(), port.clone());

        relay.handle_message(inbound(1, 10, 42, Some("hello"))).await;
        relay.handle_message(inbound(1, 10, 42, Some("hello"))).await;

        assert_eq!(model.prompts.lock().await.len(), 1);
        assert_eq!(port.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn start_command_greets_by_first_name() {
        let model = Arc::new(ScriptedModel::replying("unused"));
        let port = Arc::new(RecordingPort::new());
        let relay = relay_with(model.clone(), port.clone());

        relay.handle_message(inbound(1, 10, 42, Some("/start"))).await;

        let sent = port.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("Hi Dmitri!"));
        assert!(model.prompts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn owner_message_teaches_later_prompts() {
        let model = Arc::new(ScriptedModel::replying("ok"));
        let port = Arc::new(RecordingPort::new());
        let relay = relay_with(model.clone(), port.clone());

        relay
            .handle_message(inbound(1, 10, OWNER, Some("we ship on Fridays")))
            .await;
        assert!(port.sent.lock().await.is_empty());

        relay.handle_message(inbound(1, 11, 42, Some("when do you ship?"))).await;

        let prompts = model.prompts.lock().await.clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Owner: we ship on Fridays"));
    }

    #[tokio::test]
    async fn non_text_message_gets_apology() {
        let model = Arc::new(ScriptedModel::replying("unused"));
        let port = Arc::new(RecordingPort::new());
        let relay = relay_with(model.clone(), port.clone());

        relay.handle_message(inbound(1, 10, 42, None)).await;

        let sent = port.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("only process text messages"));
        assert!(model.prompts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stale_message_is_dropped_silently() {
        let model = Arc::new(ScriptedModel::replying("unused"));
        let port = Arc::new(RecordingPort::new());
        let relay = relay_with(model.clone(), port.clone());

        let old = Utc::now() - chrono::Duration::seconds(120);
        relay
            .handle_message(inbound_at(1, 10, 42, Some("hello"), old))
            .await;

        assert!(port.sent.lock().await.is_empty());
        assert!(model.prompts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn model_failure_notifies_owner_and_apologizes() {
        let model = Arc::new(ScriptedModel::failing());
        let port = Arc::new(RecordingPort::new());
        let relay = relay_with(model.clone(), port.clone());

        relay.handle_message(inbound(1, 10, 42, Some("hello"))).await;

        let sent = port.sent.lock().await.clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, OWNER);
        assert!(sent[0].1.contains("Error handling message from chat 1"));
        assert_eq!(sent[1].0, 1);
        assert!(sent[1].1.contains("something went wrong"));
    }

    #[tokio::test]
    async fn overlong_reply_is_truncated_to_message_limit() {
        let long = "x".repeat(6000);
        let model = Arc::new(ScriptedModel::replying(&long));
        let port = Arc::new(RecordingPort::new());
        let relay = relay_with(model.clone(), port.clone());

        relay.handle_message(inbound(1, 10, 42, Some("hello"))).await;

        let sent = port.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.len() <= 4096);
        assert!(sent[0].1.ends_with("..."));
    }
}
