use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{sync::Mutex, time::sleep};

use crate::{
    domain::ChatId,
    errors::Error,
    messaging::port::MessagingPort,
};

#[derive(Clone, Copy, Debug)]
pub struct OutboxConfig {
    /// Fixed pause before every send.
    pub reply_delay: Duration,
    /// Minimum spacing between sends to the same chat; messages inside the
    /// window are dropped, not delayed.
    pub per_chat_min_interval: Duration,
    /// Queue cap; messages beyond it are dropped with a log line.
    pub max_queue: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            reply_delay: Duration::from_secs(2),
            per_chat_min_interval: Duration::from_secs(10),
            max_queue: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Outgoing {
    chat_id: i64,
    text: String,
}

#[derive(Default)]
struct OutboxState {
    queue: Vec<Outgoing>,
    last_sent: HashMap<i64, Instant>,
    blocked: HashSet<i64>,
}

/// Best-effort outbound queue.
///
/// Replies are enqueued while an update is handled and flushed at the end of
/// it. Chats that reject delivery are marked blocked and skipped from then
/// on; every delivery failure notifies the owner. Nothing is retried.
pub struct Outbox {
    port: Arc<dyn MessagingPort>,
    cfg: OutboxConfig,
    owner: ChatId,
    state: Mutex<OutboxState>,
}

impl Outbox {
    pub fn new(port: Arc<dyn MessagingPort>, cfg: OutboxConfig, owner: ChatId) -> Self {
        Self {
            port,
            cfg,
            owner,
            state: Mutex::new(OutboxState::default()),
        }
    }

    /// Queue a message. Returns `false` when it was dropped (blocked chat,
    /// rate-limit window, or full queue).
    pub async fn enqueue(&self, chat_id: ChatId, text: &str) -> bool {
        self.enqueue_at(chat_id, text, Instant::now()).await
    }

    pub async fn enqueue_at(&self, chat_id: ChatId, text: &str, now: Instant) -> bool {
        let mut state = self.state.lock().await;

        if state.blocked.contains(&chat_id.0) {
            tracing::warn!("skipping message to blocked chat {}", chat_id.0);
            return false;
        }

        if let Some(last) = state.last_sent.get(&chat_id.0) {
            if now.duration_since(*last) < self.cfg.per_chat_min_interval {
                tracing::debug!("rate limit hit for chat {}, dropping message", chat_id.0);
                return false;
            }
        }

        if state.queue.len() >= self.cfg.max_queue {
            tracing::warn!(
                "message queue full ({} messages), dropping message for chat {}",
                self.cfg.max_queue,
                chat_id.0
            );
            return false;
        }

        state.queue.push(Outgoing {
            chat_id: chat_id.0,
            text: text.to_string(),
        });
        true
    }

    /// Send everything queued, skipping duplicates within this flush.
    ///
    /// Holding the state lock across sends serializes flushes, which keeps
    /// the per-chat ordering of replies intact.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        if state.queue.is_empty() {
            return;
        }

        let drained: Vec<Outgoing> = state.queue.drain(..).collect();
        tracing::debug!("flushing {} messages from queue", drained.len());

        let mut sent: HashSet<(i64, String)> = HashSet::new();
        for msg in drained {
            if state.blocked.contains(&msg.chat_id) {
                continue;
            }

            let key = (msg.chat_id, msg.text.clone());
            if sent.contains(&key) {
                tracing::debug!("skipping duplicate message for chat {}", msg.chat_id);
                continue;
            }

            sleep(self.cfg.reply_delay).await;

            match self.port.send_text(ChatId(msg.chat_id), &msg.text).await {
                Ok(_) => {
                    tracing::info!("sent message to chat {}", msg.chat_id);
                    state.last_sent.insert(msg.chat_id, Instant::now());
                    sent.insert(key);
                }
                Err(Error::Rejected(reason)) => {
                    tracing::error!(
                        "chat {} rejected delivery, marking blocked: {reason}",
                        msg.chat_id
                    );
                    state.blocked.insert(msg.chat_id);
                    self.notify_owner(&format!(
                        "Chat {} blocked or restricted: {reason}",
                        msg.chat_id
                    ))
                    .await;
                }
                Err(e) => {
                    tracing::error!("failed to send message to chat {}: {e}", msg.chat_id);
                    self.notify_owner(&format!(
                        "Failed to send message to chat {}: {e}",
                        msg.chat_id
                    ))
                    .await;
                }
            }
        }
    }

    /// Notify the owner directly, bypassing the queue. Best-effort.
    pub async fn notify_owner(&self, text: &str) {
        if let Err(e) = self.port.send_text(self.owner, text).await {
            tracing::error!("failed to notify owner: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::MessageRef,
        messaging::types::{ChatAction, MessagingCapabilities},
        Result,
    };
    use async_trait::async_trait;

    struct RecordingPort {
        sent: Mutex<Vec<(i64, String)>>,
        reject_chat: Option<i64>,
    }

    impl RecordingPort {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                reject_chat: None,
            }
        }

        fn rejecting(chat: i64) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                reject_chat: Some(chat),
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
            if self.reject_chat == Some(chat_id.0) {
                return Err(Error::Rejected("bot was blocked by the user".to_string()));
            }
            self.sent.lock().await.push((chat_id.0, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: crate::domain::MessageId(1),
            })
        }

        async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
            Ok(())
        }
    }

    fn fast_cfg() -> OutboxConfig {
        OutboxConfig {
            reply_delay: Duration::ZERO,
            per_chat_min_interval: Duration::from_secs(60),
            max_queue: 10,
        }
    }

    const OWNER: ChatId = ChatId(99);

    #[tokio::test]
    async fn full_queue_drops_excess_messages() {
        let port = Arc::new(RecordingPort::new());
        let outbox = Outbox::new(
            port.clone(),
            OutboxConfig {
                max_queue: 2,
                ..fast_cfg()
            },
            OWNER,
        );

        assert!(outbox.enqueue(ChatId(1), "a").await);
        assert!(outbox.enqueue(ChatId(2), "b").await);
        assert!(!outbox.enqueue(ChatId(3), "c").await);

        outbox.flush().await;
        assert_eq!(port.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn duplicates_within_one_flush_are_sent_once() {
        let port = Arc::new(RecordingPort::new());
        let outbox = Outbox::new(port.clone(), fast_cfg(), OWNER);

        assert!(outbox.enqueue(ChatId(1), "same").await);
        assert!(outbox.enqueue(ChatId(1), "same").await);

        outbox.flush().await;
        assert_eq!(port.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn min_interval_drops_followup_within_window() {
        let port = Arc::new(RecordingPort::new());
        let outbox = Outbox::new(port.clone(), fast_cfg(), OWNER);

        assert!(outbox.enqueue(ChatId(1), "first").await);
        outbox.flush().await;

        // Within the 60s window the next message is dropped at enqueue time.
        assert!(!outbox.enqueue(ChatId(1), "second").await);

        // Past the window it is accepted again.
        let later = Instant::now() + Duration::from_secs(61);
        assert!(outbox.enqueue_at(ChatId(1), "third", later).await);
    }

    #[tokio::test]
    async fn rejected_chat_is_blocked_and_owner_notified() {
        let port = Arc::new(RecordingPort::rejecting(5));
        let outbox = Outbox::new(port.clone(), fast_cfg(), OWNER);

        assert!(outbox.enqueue(ChatId(5), "hi").await);
        outbox.flush().await;

        let sent = port.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, OWNER.0);
        assert!(sent[0].1.contains("blocked or restricted"));

        // Blocked chats are dropped at enqueue time afterwards.
        assert!(!outbox.enqueue(ChatId(5), "again").await);
    }

    #[tokio::test]
    async fn other_send_failures_notify_owner_without_blocking() {
        struct FailingPort {
            sent: Mutex<Vec<(i64, String)>>,
        }

        #[async_trait]
        impl MessagingPort for FailingPort {
            fn capabilities(&self) -> MessagingCapabilities {
                MessagingCapabilities {
                    supports_chat_actions: true,
                    max_message_len: 4096,
                }
            }

            async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
                if chat_id.0 != OWNER.0 {
                    return Err(Error::External("network down".to_string()));
                }
                self.sent.lock().await.push((chat_id.0, text.to_string()));
                Ok(MessageRef {
                    chat_id,
                    message_id: crate::domain::MessageId(1),
                })
            }

            async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
                Ok(())
            }
        }

        let port = Arc::new(FailingPort {
            sent: Mutex::new(Vec::new()),
        });
        let outbox = Outbox::new(port.clone(), fast_cfg(), OWNER);

        assert!(outbox.enqueue(ChatId(1), "hi").await);
        outbox.flush().await;

        let sent = port.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Failed to send message"));

        // A transient failure must not block the chat.
        assert!(outbox.enqueue(ChatId(1), "retry later").await);
    }
}
