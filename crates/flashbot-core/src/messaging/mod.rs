//! Cross-messenger abstractions (Telegram today).

pub mod outbox;
pub mod port;
pub mod types;
