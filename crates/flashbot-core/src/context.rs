use std::path::Path;

use tokio::sync::RwLock;

/// Fallback persona when no `context.txt` ships next to the binary.
const DEFAULT_PERSONA: &str =
    "You are a friendly support assistant. Answer briefly and helpfully.";

/// Persona context plus the owner-taught addendum.
///
/// The persona is loaded once at startup; the learned part grows while the
/// process runs and is gone after a restart (no storage layer).
pub struct ContextStore {
    persona: String,
    learned: RwLock<String>,
}

impl ContextStore {
    pub fn load(path: &Path) -> Self {
        let persona = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!(
                    "context file {} not found, using default persona",
                    path.display()
                );
                DEFAULT_PERSONA.to_string()
            }
        };
        Self::with_persona(persona)
    }

    pub fn with_persona(persona: String) -> Self {
        Self {
            persona,
            learned: RwLock::new(String::new()),
        }
    }

    /// Owner messages are never answered; they teach the bot instead.
    pub async fn learn_from_owner(&self, text: &str) {
        let mut learned = self.learned.write().await;
        learned.push_str("\n\nOwner: ");
        learned.push_str(text);
    }

    /// Prompt preamble: persona followed by whatever the owner taught so far.
    pub async fn preamble(&self) -> String {
        let learned = self.learned.read().await;
        if learned.is_empty() {
            return self.persona.clone();
        }
        format!("{}\n{}", self.persona, learned)
    }
}
