use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::Stream;
use parking_lot::Mutex;

use strand_core::errors::GatewayError;
use strand_core::messages::{
    AssistantContent, AssistantMessage, StopReason, ToolCallBlock,
};
use strand_core::provider::{LlmContext, LlmProvider, StreamOptions};
use strand_core::stream::StreamEvent;
use strand_core::tokens::TokenUsage;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: a streamed text response with no usage data.
    pub fn stream_text(text: &str) -> Self {
        Self::stream_text_with_usage(text, None)
    }

    /// Convenience: a streamed text response carrying provider usage.
    pub fn stream_text_with_usage(text: &str, usage: Option<TokenUsage>) -> Self {
        let text = text.to_string();
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextStart,
            StreamEvent::TextDelta { delta: text.clone() },
            StreamEvent::TextEnd { text: text.clone() },
            StreamEvent::Done {
                message: AssistantMessage {
                    content: vec![AssistantContent::Text { text }],
                    usage,
                    stop_reason: Some(StopReason::EndTurn),
                },
                stop_reason: StopReason::EndTurn,
            },
        ])
    }

    /// Convenience: a response requesting the given tool calls.
    pub fn stream_tool_calls(calls: Vec<ToolCallBlock>) -> Self {
        let mut events = vec![StreamEvent::Start];
        let mut content = Vec::new();
        for call in calls {
            events.push(StreamEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
            });
            events.push(StreamEvent::ToolCallEnd {
                tool_call: call.clone(),
            });
            content.push(AssistantContent::ToolCall(call));
        }
        events.push(StreamEvent::Done {
            message: AssistantMessage {
                content,
                usage: Some(TokenUsage::default()),
                stop_reason: Some(StopReason::ToolUse),
            },
            stop_reason: StopReason::ToolUse,
        });
        Self::Stream(events)
    }

    /// Convenience: a stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn context_window(&self) -> usize {
        200_000
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        _context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let Some(response) = self.responses.lock().pop_front() else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(
    response: MockResponse,
) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => {
                return Ok(Box::pin(stream::iter(events)));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
