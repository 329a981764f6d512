use serde::{Deserialize, Serialize};

use crate::ids::{EventId, ThreadId, ToolCallId};
use crate::messages::ToolResultMessage;
use crate::tokens::BudgetState;

/// Persisted thread event types. The payload shape of each stored event is
/// determined by this tag and must stay stable for replay to succeed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreadEventType {
    UserMessage,
    AgentMessage,
    ToolCall,
    ToolResult,
    ToolApprovalRequest,
    ToolApprovalResponse,
    SystemPrompt,
    UserSystemPrompt,
    LocalSystemMessage,
}

impl std::fmt::Display for ThreadEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{self:?}"));
        f.write_str(&s)
    }
}

impl std::str::FromStr for ThreadEventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| format!("unknown thread event type: {s}"))
    }
}

/// Conversation agent lifecycle states. Owned exclusively by the agent;
/// every transition is emitted as a `StateChange` observable event.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Thinking,
    Streaming,
    ToolExecution,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Thinking => f.write_str("thinking"),
            Self::Streaming => f.write_str("streaming"),
            Self::ToolExecution => f.write_str("tool_execution"),
        }
    }
}

/// Observable events emitted by the agent during execution.
/// Delivered synchronously in-process; not to be confused with the
/// persisted thread events above.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "state_change")]
    StateChange {
        thread_id: ThreadId,
        from: AgentState,
        to: AgentState,
    },

    #[serde(rename = "thinking_start")]
    ThinkingStart { thread_id: ThreadId },

    #[serde(rename = "thinking_complete")]
    ThinkingComplete { thread_id: ThreadId },

    #[serde(rename = "token")]
    Token { thread_id: ThreadId, token: String },

    #[serde(rename = "tool_call_start")]
    ToolCallStart {
        thread_id: ThreadId,
        tool_name: String,
        input: serde_json::Value,
        call_id: ToolCallId,
    },

    #[serde(rename = "tool_call_complete")]
    ToolCallComplete {
        thread_id: ThreadId,
        tool_name: String,
        call_id: ToolCallId,
        result: ToolResultMessage,
    },

    #[serde(rename = "conversation_complete")]
    ConversationComplete { thread_id: ThreadId },

    #[serde(rename = "error")]
    Error {
        thread_id: ThreadId,
        error: String,
        phase: String,
    },

    #[serde(rename = "budget_warning")]
    BudgetWarning {
        thread_id: ThreadId,
        message: String,
        usage: BudgetState,
        recommendations: Vec<String>,
    },

    #[serde(rename = "thread_event_added")]
    ThreadEventAdded {
        thread_id: ThreadId,
        event_id: EventId,
        event_type: ThreadEventType,
        sequence: i64,
    },
}

impl AgentEvent {
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Self::StateChange { thread_id, .. }
            | Self::ThinkingStart { thread_id }
            | Self::ThinkingComplete { thread_id }
            | Self::Token { thread_id, .. }
            | Self::ToolCallStart { thread_id, .. }
            | Self::ToolCallComplete { thread_id, .. }
            | Self::ConversationComplete { thread_id }
            | Self::Error { thread_id, .. }
            | Self::BudgetWarning { thread_id, .. }
            | Self::ThreadEventAdded { thread_id, .. } => thread_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChange { .. } => "state_change",
            Self::ThinkingStart { .. } => "thinking_start",
            Self::ThinkingComplete { .. } => "thinking_complete",
            Self::Token { .. } => "token",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallComplete { .. } => "tool_call_complete",
            Self::ConversationComplete { .. } => "conversation_complete",
            Self::Error { .. } => "error",
            Self::BudgetWarning { .. } => "budget_warning",
            Self::ThreadEventAdded { .. } => "thread_event_added",
        }
    }
}
