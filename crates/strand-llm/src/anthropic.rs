//! Anthropic Messages API adapter.
//!
//! Maps the provider-neutral context onto the Messages wire format and
//! turns the SSE response back into the internal stream-event contract.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use strand_core::errors::GatewayError;
use strand_core::ids::ToolCallId;
use strand_core::messages::{
    AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock, ToolResultContent,
    UserContent,
};
use strand_core::provider::{LlmContext, LlmProvider, StreamOptions};
use strand_core::stream::StreamEvent;
use strand_core::tokens::TokenUsage;

use crate::sse::{SseEvent, SseParser};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    context_window: usize,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            context_window: 200_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, context: &LlmContext, options: &StreamOptions) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": &self.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": context.messages.iter().map(wire_message).collect::<Vec<_>>(),
            "stream": true,
        });

        if let Some(system) = &context.system_prompt {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if !options.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(&options.stop_sequences);
        }
        if !context.tools.is_empty() {
            body["tools"] = serde_json::json!(context
                .tools
                .iter()
                .map(|t| serde_json::json!({
                    "name": &t.name,
                    "description": &t.description,
                    "input_schema": &t.parameters_schema,
                }))
                .collect::<Vec<_>>());
        }

        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        let body = self.build_body(context, options);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut parser = SseParser::new();
            let mut acc = MessageAccumulator::new();

            let _ = tx.send(StreamEvent::Start).await;

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                error: GatewayError::StreamInterrupted(e.to_string()),
                            })
                            .await;
                        return;
                    }
                };

                for sse in parser.push(&String::from_utf8_lossy(&chunk)) {
                    for event in acc.apply(&sse) {
                        let terminal = event.is_terminal();
                        if tx.send(event).await.is_err() {
                            return; // receiver dropped — caller aborted
                        }
                        if terminal {
                            return;
                        }
                    }
                }
            }

            // Stream ended without message_stop.
            let _ = tx
                .send(StreamEvent::Error {
                    error: GatewayError::StreamInterrupted(
                        "response ended before message_stop".into(),
                    ),
                })
                .await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Map one internal message onto the Messages wire shape.
/// Thinking blocks are not replayed — they cannot be re-sent verbatim.
fn wire_message(message: &Message) -> serde_json::Value {
    match message {
        Message::User(user) => {
            let content: Vec<serde_json::Value> = user
                .content
                .iter()
                .map(|c| match c {
                    UserContent::Text { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    }
                    UserContent::Image { mime_type, data } => serde_json::json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": mime_type, "data": data},
                    }),
                })
                .collect();
            serde_json::json!({"role": "user", "content": content})
        }
        Message::Assistant(assistant) => {
            let content: Vec<serde_json::Value> = assistant
                .content
                .iter()
                .filter_map(|c| match c {
                    AssistantContent::Text { text } => {
                        Some(serde_json::json!({"type": "text", "text": text}))
                    }
                    AssistantContent::Thinking { .. } => None,
                    AssistantContent::ToolCall(tc) => Some(serde_json::json!({
                        "type": "tool_use",
                        "id": &tc.id,
                        "name": &tc.name,
                        "input": &tc.arguments,
                    })),
                })
                .collect();
            serde_json::json!({"role": "assistant", "content": content})
        }
        Message::ToolResult(result) => {
            let content: Vec<serde_json::Value> = result
                .content
                .iter()
                .map(|c| match c {
                    ToolResultContent::Text { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    }
                    ToolResultContent::Image { mime_type, data } => serde_json::json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": mime_type, "data": data},
                    }),
                })
                .collect();
            serde_json::json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": &result.tool_call_id,
                    "is_error": result.is_error,
                    "content": content,
                }],
            })
        }
    }
}

/// Accumulates Messages-API SSE events into the internal stream contract.
struct MessageAccumulator {
    blocks: Vec<BlockAcc>,
    prompt_tokens: u32,
    completion_tokens: u32,
    stop_reason: StopReason,
}

enum BlockAcc {
    Text { text: String },
    Thinking { text: String },
    ToolUse { id: ToolCallId, name: String, json: String },
}

impl MessageAccumulator {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            stop_reason: StopReason::EndTurn,
        }
    }

    fn apply(&mut self, sse: &SseEvent) -> Vec<StreamEvent> {
        let Ok(data) = serde_json::from_str::<serde_json::Value>(&sse.data) else {
            if !sse.data.is_empty() {
                warn!(event = ?sse.event, "unparseable SSE payload dropped");
            }
            return Vec::new();
        };

        match sse.event.as_deref() {
            Some("message_start") => {
                if let Some(input) = data["message"]["usage"]["input_tokens"].as_u64() {
                    self.prompt_tokens = input as u32;
                }
                Vec::new()
            }
            Some("content_block_start") => self.block_start(&data),
            Some("content_block_delta") => self.block_delta(&data),
            Some("content_block_stop") => self.block_stop(&data),
            Some("message_delta") => {
                if let Some(output) = data["usage"]["output_tokens"].as_u64() {
                    self.completion_tokens = output as u32;
                }
                if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                    self.stop_reason = parse_stop_reason(reason);
                }
                Vec::new()
            }
            Some("message_stop") => vec![self.finish()],
            Some("error") => {
                let message = data["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown provider error")
                    .to_string();
                vec![StreamEvent::Error {
                    error: GatewayError::StreamInterrupted(message),
                }]
            }
            _ => Vec::new(), // ping and future event types
        }
    }

    fn block_start(&mut self, data: &serde_json::Value) -> Vec<StreamEvent> {
        let block = &data["content_block"];
        match block["type"].as_str() {
            Some("text") => {
                self.blocks.push(BlockAcc::Text { text: String::new() });
                vec![StreamEvent::TextStart]
            }
            Some("thinking") => {
                self.blocks.push(BlockAcc::Thinking { text: String::new() });
                vec![StreamEvent::ThinkingStart]
            }
            Some("tool_use") => {
                let id = ToolCallId::from_raw(block["id"].as_str().unwrap_or_default());
                let name = block["name"].as_str().unwrap_or_default().to_string();
                self.blocks.push(BlockAcc::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    json: String::new(),
                });
                vec![StreamEvent::ToolCallStart { tool_call_id: id, name }]
            }
            _ => Vec::new(),
        }
    }

    fn block_delta(&mut self, data: &serde_json::Value) -> Vec<StreamEvent> {
        let delta = &data["delta"];
        let Some(last) = self.blocks.last_mut() else {
            return Vec::new();
        };

        match delta["type"].as_str() {
            Some("text_delta") => {
                let piece = delta["text"].as_str().unwrap_or_default();
                if let BlockAcc::Text { text } = last {
                    text.push_str(piece);
                }
                vec![StreamEvent::TextDelta { delta: piece.to_string() }]
            }
            Some("thinking_delta") => {
                let piece = delta["thinking"].as_str().unwrap_or_default();
                if let BlockAcc::Thinking { text } = last {
                    text.push_str(piece);
                }
                vec![StreamEvent::ThinkingDelta { delta: piece.to_string() }]
            }
            Some("input_json_delta") => {
                let piece = delta["partial_json"].as_str().unwrap_or_default();
                if let BlockAcc::ToolUse { id, json, .. } = last {
                    json.push_str(piece);
                    return vec![StreamEvent::ToolCallDelta {
                        tool_call_id: id.clone(),
                        arguments_delta: piece.to_string(),
                    }];
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn block_stop(&mut self, _data: &serde_json::Value) -> Vec<StreamEvent> {
        match self.blocks.last() {
            Some(BlockAcc::Text { text }) => vec![StreamEvent::TextEnd { text: text.clone() }],
            Some(BlockAcc::Thinking { text }) => {
                vec![StreamEvent::ThinkingEnd { thinking: text.clone() }]
            }
            Some(BlockAcc::ToolUse { id, name, json }) => {
                let arguments = serde_json::from_str(json)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                vec![StreamEvent::ToolCallEnd {
                    tool_call: ToolCallBlock {
                        id: id.clone(),
                        name: name.clone(),
                        arguments,
                    },
                }]
            }
            None => Vec::new(),
        }
    }

    fn finish(&mut self) -> StreamEvent {
        let content: Vec<AssistantContent> = self
            .blocks
            .drain(..)
            .map(|b| match b {
                BlockAcc::Text { text } => AssistantContent::Text { text },
                BlockAcc::Thinking { text } => AssistantContent::Thinking { text },
                BlockAcc::ToolUse { id, name, json } => {
                    let arguments = serde_json::from_str(&json)
                        .unwrap_or(serde_json::Value::Object(Default::default()));
                    AssistantContent::ToolCall(ToolCallBlock { id, name, arguments })
                }
            })
            .collect();

        StreamEvent::Done {
            message: AssistantMessage {
                content,
                usage: Some(TokenUsage::new(self.prompt_tokens, self.completion_tokens)),
                stop_reason: Some(self.stop_reason.clone()),
            },
            stop_reason: self.stop_reason.clone(),
        }
    }
}

fn parse_stop_reason(raw: &str) -> StopReason {
    match raw {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}
