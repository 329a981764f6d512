//! Pure folds over a thread's event sequence.
//!
//! Everything the runtime needs to know about a thread — provider-facing
//! history, the active system prompt, unresolved tool calls — is derived
//! here by replaying the log. Folding the same events twice yields the
//! same result.

use std::collections::HashSet;

use strand_core::messages::{
    AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock, ToolResultMessage,
};
use strand_core::tokens::TokenUsage;

use crate::events::EventRow;

/// Build provider-facing messages from a thread's ordered event sequence.
///
/// - `user_message` becomes a user turn.
/// - `agent_message` becomes an assistant turn; the contiguous run of
///   `tool_call` events immediately following it is attached as the
///   assistant's requested actions. A tool_call with no later result
///   (e.g. after a crash mid-approval) is still surfaced this way.
/// - `tool_result` becomes a tool-response turn keyed by call id. A result
///   with no matching tool_call is skipped silently.
/// - System prompt events and approval bookkeeping configure the call, not
///   the dialogue, and are excluded.
pub fn fold_history(events: &[EventRow]) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut known_calls: HashSet<String> = HashSet::new();

    let mut i = 0;
    while i < events.len() {
        let event = &events[i];
        match event.event_type.as_str() {
            "user_message" => {
                if let Some(text) = event.payload.get("text").and_then(|t| t.as_str()) {
                    messages.push(Message::user_text(text));
                }
                i += 1;
            }
            "agent_message" => {
                let text = event
                    .payload
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                let usage: Option<TokenUsage> = event
                    .payload
                    .get("usage")
                    .cloned()
                    .and_then(|u| serde_json::from_value(u).ok());
                let stop_reason: Option<StopReason> = event
                    .payload
                    .get("stop_reason")
                    .cloned()
                    .and_then(|s| serde_json::from_value(s).ok());

                let mut content = vec![AssistantContent::Text { text }];

                let mut j = i + 1;
                while j < events.len() && events[j].event_type == "tool_call" {
                    if let Ok(block) =
                        serde_json::from_value::<ToolCallBlock>(events[j].payload.clone())
                    {
                        known_calls.insert(block.id.as_str().to_string());
                        content.push(AssistantContent::ToolCall(block));
                    }
                    j += 1;
                }

                messages.push(Message::Assistant(AssistantMessage {
                    content,
                    usage,
                    stop_reason,
                }));
                i = j;
            }
            "tool_result" => {
                if let Ok(result) =
                    serde_json::from_value::<ToolResultMessage>(event.payload.clone())
                {
                    if known_calls.contains(result.tool_call_id.as_str()) {
                        messages.push(Message::ToolResult(result));
                    }
                }
                i += 1;
            }
            _ => {
                // tool_call outside an assistant run, approval bookkeeping,
                // and system events produce no dialogue turns.
                i += 1;
            }
        }
    }

    messages
}

/// The system prompt in effect for the thread: all system_prompt and
/// user_system_prompt texts in append order, joined. local_system_message
/// events are operator-facing notices and never reach the provider.
pub fn system_prompt(events: &[EventRow]) -> Option<String> {
    let parts: Vec<&str> = events
        .iter()
        .filter(|e| {
            matches!(
                e.event_type.as_str(),
                "system_prompt" | "user_system_prompt"
            )
        })
        .filter_map(|e| e.payload.get("text").and_then(|t| t.as_str()))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Reconstruct the current batch membership from the log: the contiguous
/// run of tool_call events after the last agent_message, minus any call
/// that already has a terminal result. This is how a restarted process
/// resumes mid-turn with the correct pending set.
pub fn pending_tool_calls(events: &[EventRow]) -> Vec<ToolCallBlock> {
    let Some(last_agent) = events
        .iter()
        .rposition(|e| e.event_type == "agent_message")
    else {
        return Vec::new();
    };

    let resolved: HashSet<&str> = events
        .iter()
        .filter(|e| e.event_type == "tool_result")
        .filter_map(|e| e.payload.get("tool_call_id").and_then(|v| v.as_str()))
        .collect();

    events[last_agent + 1..]
        .iter()
        .take_while(|e| e.event_type == "tool_call")
        .filter_map(|e| serde_json::from_value::<ToolCallBlock>(e.payload.clone()).ok())
        .filter(|block| !resolved.contains(block.id.as_str()))
        .collect()
}
