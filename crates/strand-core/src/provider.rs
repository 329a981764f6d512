use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::GatewayError;
use crate::messages::Message;
use crate::stream::StreamEvent;
use crate::tools::ToolDefinition;

/// The complete context sent to a provider for one call: the folded
/// conversation history plus call configuration.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub working_directory: PathBuf,
}

impl LlmContext {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Options controlling generation behavior for a single call.
/// `max_tokens` is the declared completion budget — configuration, not an
/// estimate — and is what the budget monitor checks headroom against.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: None,
            stop_sequences: Vec::new(),
        }
    }
}

/// Trait implemented by each LLM provider adapter.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn context_window(&self) -> usize;
    fn supports_tools(&self) -> bool;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError>;
}
