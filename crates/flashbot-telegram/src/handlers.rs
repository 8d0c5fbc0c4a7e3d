use std::sync::Arc;

use teloxide::prelude::*;

use flashbot_core::{
    domain::{ChatId, MessageId, UserId},
    messaging::types::InboundMessage,
};

use crate::router::AppState;

/// Convert a Telegram message into the cross-messenger shape and hand it to
/// the relay. Updates for the same chat are serialized.
pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        // Channel posts and service messages carry no sender; nothing to do.
        return Ok(());
    };

    let inbound = InboundMessage {
        chat_id: ChatId(msg.chat.id.0),
        message_id: MessageId(msg.id.0),
        sender: UserId(user.id.0 as i64),
        first_name: Some(user.first_name.clone()),
        text: msg.text().map(|s| s.to_string()),
        sent_at: msg.date,
    };

    let _guard = state.chat_locks.lock_chat(msg.chat.id.0).await;
    state.relay.handle_message(inbound).await;

    Ok(())
}
