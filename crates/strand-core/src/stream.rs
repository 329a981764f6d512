use crate::errors::GatewayError;
use crate::ids::ToolCallId;
use crate::messages::{AssistantMessage, StopReason, ToolCallBlock};

/// Events emitted during provider streaming. Ordering contract:
///
/// Start → (TextStart → TextDelta* → TextEnd | ThinkingStart → ThinkingDelta* → ThinkingEnd |
///          ToolCallStart → ToolCallDelta* → ToolCallEnd)* → Done
///
/// Error can appear at any point and terminates the stream. A provider
/// without incremental delivery yields Start followed directly by Done.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,

    TextStart,
    TextDelta { delta: String },
    TextEnd { text: String },

    ThinkingStart,
    ThinkingDelta { delta: String },
    ThinkingEnd { thinking: String },

    ToolCallStart { tool_call_id: ToolCallId, name: String },
    ToolCallDelta { tool_call_id: ToolCallId, arguments_delta: String },
    ToolCallEnd { tool_call: ToolCallBlock },

    Done { message: AssistantMessage, stop_reason: StopReason },
    Error { error: GatewayError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn is_content_delta(&self) -> bool {
        matches!(
            self,
            Self::TextDelta { .. } | Self::ThinkingDelta { .. } | Self::ToolCallDelta { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        let done = StreamEvent::Done {
            message: AssistantMessage::text("hi"),
            stop_reason: StopReason::EndTurn,
        };
        assert!(done.is_terminal());

        let err = StreamEvent::Error {
            error: GatewayError::ProviderOverloaded,
        };
        assert!(err.is_terminal());

        let delta = StreamEvent::TextDelta { delta: "x".into() };
        assert!(!delta.is_terminal());
        assert!(delta.is_content_delta());
    }

    #[test]
    fn start_is_not_content() {
        assert!(!StreamEvent::Start.is_content_delta());
        assert!(!StreamEvent::TextStart.is_content_delta());
    }
}
