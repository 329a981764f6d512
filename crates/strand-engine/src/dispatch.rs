//! Optimistic tool dispatch.
//!
//! A dispatch attempt resolves one of three ways — Done with a terminal
//! result, Pending (the approval gate wants an operator decision), or
//! Failed (infrastructure fault). Execution failures are not errors at
//! this layer: they come back as Done with `is_error` set, and the turn
//! continues.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, warn};

use strand_core::approval::{GateDecision, DENIAL_MESSAGE};
use strand_core::messages::{ToolCallBlock, ToolResultMessage};
use strand_core::tools::ToolContext;

use crate::approval::ApprovalGate;
use crate::registry::ToolRegistry;
use crate::truncate;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Three-way outcome of a dispatch attempt.
#[derive(Debug)]
pub enum DispatchOutcome {
    Done(ToolResultMessage),
    Pending,
    Failed(String),
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    gate: Arc<dyn ApprovalGate>,
    tool_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<dyn ApprovalGate>) -> Self {
        Self {
            registry,
            gate,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn gate(&self) -> &Arc<dyn ApprovalGate> {
        &self.gate
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Attempt a tool call. Consults the gate first; execution only
    /// happens on Allow. Deny produces a terminal error result with the
    /// fixed denial message — an operational outcome, not a fault.
    pub async fn dispatch(&self, call: &ToolCallBlock, ctx: &ToolContext) -> DispatchOutcome {
        match self.gate.request_decision(call) {
            GateDecision::Allow => DispatchOutcome::Done(self.run_unchecked(call, ctx).await),
            GateDecision::Deny => {
                DispatchOutcome::Done(ToolResultMessage::error(call.id.clone(), DENIAL_MESSAGE))
            }
            GateDecision::Pending => DispatchOutcome::Pending,
        }
    }

    /// Execute a tool call bypassing the gate — used when a previously
    /// pending call is approved. Timeouts, panics, and tool errors are all
    /// captured as `is_error` results; oversized output is truncated.
    pub async fn run_unchecked(&self, call: &ToolCallBlock, ctx: &ToolContext) -> ToolResultMessage {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResultMessage::error(
                call.id.clone(),
                format!("unknown tool: {}", call.name),
            );
        };

        let result = tokio::time::timeout(
            self.tool_timeout,
            std::panic::AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind(),
        )
        .await;

        let (content, is_error) = match result {
            Ok(Ok(Ok(output))) => (output.content, output.is_error),
            Ok(Ok(Err(e))) => (e.to_string(), true),
            Ok(Err(panic)) => {
                error!(
                    tool = %call.name,
                    panic = %panic_message(&panic),
                    "tool panicked during execution"
                );
                ("internal error: tool crashed".into(), true)
            }
            Err(_) => {
                warn!(
                    tool = %call.name,
                    timeout_secs = self.tool_timeout.as_secs(),
                    "tool timed out"
                );
                (
                    format!("tool timed out after {}s", self.tool_timeout.as_secs()),
                    true,
                )
            }
        };

        let max = truncate::max_output_for_tool(&call.name);
        let content = truncate::truncate_output(&content, max);

        if is_error {
            ToolResultMessage::error(call.id.clone(), content)
        } else {
            ToolResultMessage::text(call.id.clone(), content)
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strand_core::ids::{ThreadId, ToolCallId};
    use strand_core::tools::{ExecutionMode, Tool, ToolError, ToolOutput};
    use tokio_util::sync::CancellationToken;

    use crate::approval::{AllowAllGate, PolicyGate};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(
                args["text"].as_str().unwrap_or_default().to_string(),
            ))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            panic!("tool exploded");
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps forever"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn execution_mode(&self) -> ExecutionMode {
            ExecutionMode::Sequential
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::text("done"))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            thread_id: ThreadId::new(),
            parent_thread_id: None,
            working_directory: std::env::temp_dir(),
            abort: CancellationToken::new(),
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCallBlock {
        ToolCallBlock {
            id: ToolCallId::new(),
            name: name.into(),
            arguments: args,
        }
    }

    fn dispatcher_with(gate: Arc<dyn ApprovalGate>) -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(PanicTool));
        registry.register(Arc::new(SlowTool));
        ToolDispatcher::new(Arc::new(registry), gate)
    }

    #[tokio::test]
    async fn allowed_call_executes() {
        let dispatcher = dispatcher_with(Arc::new(AllowAllGate));
        let outcome = dispatcher
            .dispatch(&call("echo", serde_json::json!({"text": "hi"})), &ctx())
            .await;
        let DispatchOutcome::Done(result) = outcome else {
            panic!("expected Done");
        };
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "hi");
    }

    #[tokio::test]
    async fn ungated_tool_pends() {
        let gate = Arc::new(PolicyGate::new([], []));
        let dispatcher = dispatcher_with(gate);
        let outcome = dispatcher
            .dispatch(&call("echo", serde_json::json!({})), &ctx())
            .await;
        assert!(matches!(outcome, DispatchOutcome::Pending));
    }

    #[tokio::test]
    async fn denied_call_gets_fixed_message() {
        let gate = Arc::new(PolicyGate::new([], ["echo".to_string()]));
        let dispatcher = dispatcher_with(gate);
        let outcome = dispatcher
            .dispatch(&call("echo", serde_json::json!({})), &ctx())
            .await;
        let DispatchOutcome::Done(result) = outcome else {
            panic!("expected Done");
        };
        assert!(result.is_error);
        assert_eq!(result.text_content(), DENIAL_MESSAGE);
    }

    #[tokio::test]
    async fn unknown_tool_is_error_result() {
        let dispatcher = dispatcher_with(Arc::new(AllowAllGate));
        let result = dispatcher
            .run_unchecked(&call("missing", serde_json::json!({})), &ctx())
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("unknown tool"));
    }

    #[tokio::test]
    async fn panic_captured_as_error_result() {
        let dispatcher = dispatcher_with(Arc::new(AllowAllGate));
        let result = dispatcher
            .run_unchecked(&call("panic", serde_json::json!({})), &ctx())
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("crashed"));
    }

    #[tokio::test]
    async fn timeout_captured_as_error_result() {
        let dispatcher =
            dispatcher_with(Arc::new(AllowAllGate)).with_tool_timeout(Duration::from_millis(20));
        let result = dispatcher
            .run_unchecked(&call("slow", serde_json::json!({})), &ctx())
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("timed out"));
    }
}
