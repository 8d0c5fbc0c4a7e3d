/// Core error type for the relay.
///
/// Adapter crates should map their specific errors into this type so the
/// relay core can handle failures consistently (drop vs blocked-chat vs
/// operator-visible).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("tunnel error: {0}")]
    Tunnel(String),

    /// The recipient refused delivery (HTTP 400 family from the chat
    /// platform). The chat is treated as blocked from then on.
    #[error("recipient rejected delivery: {0}")]
    Rejected(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
