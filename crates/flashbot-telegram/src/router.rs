use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use teloxide::{
    dispatching::Dispatcher, dptree, error_handlers::LoggingErrorHandler, prelude::*,
    update_listeners::webhooks,
};

use tokio::sync::{Mutex, OwnedMutexGuard};

use flashbot_core::{
    config::Config,
    context::ContextStore,
    domain::ChatId,
    messaging::{
        outbox::{Outbox, OutboxConfig},
        port::MessagingPort,
    },
    model::ChatModel,
    relay::RelayService,
};

use crate::handlers;
use crate::TelegramMessenger;

pub struct AppState {
    pub relay: Arc<RelayService>,
    pub chat_locks: Arc<ChatLocks>,
}

#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Register the webhook with Telegram, then serve updates on the local port
/// until the process is terminated.
pub async fn run_webhook(cfg: Arc<Config>, model: Arc<dyn ChatModel>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!("flashbot started: @{}", me.username());
    }

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let outbox = Arc::new(Outbox::new(
        messenger.clone(),
        OutboxConfig {
            reply_delay: cfg.reply_delay,
            per_chat_min_interval: cfg.per_chat_min_interval,
            max_queue: cfg.outbox_capacity,
        },
        ChatId(cfg.owner_chat_id),
    ));
    let context = ContextStore::load(&cfg.context_file);
    let relay = Arc::new(RelayService::new(
        cfg.clone(),
        model,
        messenger,
        outbox,
        context,
    ));

    // The listener answers Telegram on the local port; `webhooks::axum` also
    // registers the public URL with the Bot API.
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = webhooks::axum(
        bot.clone(),
        webhooks::Options::new(addr, cfg.webhook_url.clone()),
    )
    .await?;
    tracing::info!("webhook set: {}", cfg.webhook_url);

    let state = Arc::new(AppState {
        relay,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("webhook update listener error"),
        )
        .await;

    tracing::info!("dispatcher stopped");
    Ok(())
}
