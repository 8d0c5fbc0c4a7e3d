use async_trait::async_trait;

use crate::Result;

/// Port for the generative-AI completion backend.
///
/// The relay only needs single-shot text completion; streaming, tools and
/// vision are out of scope.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier used in logs (e.g. `gemini-1.5-flash`).
    fn model_id(&self) -> &str;

    /// Run one prompt to completion and return the text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}
