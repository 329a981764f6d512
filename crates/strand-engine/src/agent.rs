//! The conversation agent state machine.
//!
//! Drives one thread's dialogue: idle → thinking → [streaming] →
//! tool_execution → idle. Every step is persisted to the append-only
//! event log before the machine moves on, so the log is always a faithful
//! replayable record — no duplicate executions, no lost transitions.
//!
//! Tool calls are dispatched optimistically as soon as they are appended.
//! A call the gate holds for approval suspends only itself; the rest of
//! the batch keeps resolving, and resolutions may arrive in any order.
//! When the batch empties the agent re-invokes the provider with the
//! extended history.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

use strand_core::approval::{ApprovalDecision, DENIAL_MESSAGE};
use strand_core::errors::GatewayError;
use strand_core::events::{AgentEvent, AgentState, ThreadEventType};
use strand_core::ids::{ThreadId, ToolCallId};
use strand_core::messages::{AssistantMessage, ToolCallBlock, ToolResultMessage};
use strand_core::provider::{LlmContext, LlmProvider, StreamOptions};
use strand_core::stream::StreamEvent;
use strand_core::tokens::TokenUsage;
use strand_core::tools::ToolContext;
use strand_store::events::EventRepo;
use strand_store::fold;
use strand_store::threads::ThreadRepo;
use strand_store::Database;

use crate::batch::{BatchResolution, BatchTracker};
use crate::budget::{BudgetConfig, TokenBudget};
use crate::dispatch::{DispatchOutcome, ToolDispatcher};
use crate::error::EngineError;

/// Configuration for a conversation agent.
pub struct AgentConfig {
    pub max_turns: u32,
    pub stream_options: StreamOptions,
    /// Budgeting is strictly optional; None changes no behavior.
    pub budget: Option<BudgetConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            stream_options: StreamOptions::default(),
            budget: None,
        }
    }
}

/// One thread's conversation agent.
///
/// State transitions execute one at a time (`turn_gate`); the batch set is
/// the only cross-call shared mutable state and sits behind its own lock.
pub struct ConversationAgent {
    thread_id: ThreadId,
    parent_thread_id: Option<ThreadId>,
    working_directory: PathBuf,
    provider: Arc<dyn LlmProvider>,
    dispatcher: Arc<ToolDispatcher>,
    events: EventRepo,
    threads: ThreadRepo,
    event_tx: broadcast::Sender<AgentEvent>,
    config: AgentConfig,
    state: Mutex<AgentState>,
    batch: Mutex<BatchTracker>,
    budget: Option<Mutex<TokenBudget>>,
    turn_gate: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
}

impl ConversationAgent {
    /// Build an agent for an existing thread. If the log ends mid-turn
    /// (tool calls after the last agent message without results), the
    /// pending batch is rebuilt from the log and the agent resumes in
    /// tool_execution.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        dispatcher: Arc<ToolDispatcher>,
        db: Database,
        event_tx: broadcast::Sender<AgentEvent>,
        thread_id: ThreadId,
        config: AgentConfig,
    ) -> Result<Self, EngineError> {
        let threads = ThreadRepo::new(db.clone());
        let events = EventRepo::new(db);
        let thread = threads.get(&thread_id)?;

        let rows = events.list(&thread_id, None, None)?;
        let mut batch = BatchTracker::new();
        for call in fold::pending_tool_calls(&rows) {
            batch.insert(call.id);
        }
        let initial_state = if batch.is_empty() {
            AgentState::Idle
        } else {
            AgentState::ToolExecution
        };

        let budget = config.budget.clone().map(|cfg| {
            let mut budget = TokenBudget::new(cfg);
            // Seed from the thread's accumulated totals so a restarted
            // process sees the same budget the log implies. Any threshold
            // crossing happened in a previous life; the warning is not
            // re-raised here.
            let _ = budget.record_usage(
                thread.tokens.total_prompt_tokens,
                thread.tokens.total_completion_tokens,
            );
            Mutex::new(budget)
        });

        Ok(Self {
            thread_id,
            parent_thread_id: thread.parent_thread_id.clone(),
            working_directory: PathBuf::from(&thread.working_directory),
            provider,
            dispatcher,
            events,
            threads,
            event_tx,
            config,
            state: Mutex::new(initial_state),
            batch: Mutex::new(batch),
            budget,
            turn_gate: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    /// Count of tool calls still awaiting resolution in the current batch.
    pub fn pending_tool_calls(&self) -> usize {
        self.batch.lock().len()
    }

    pub fn token_budget_status(&self) -> Option<strand_core::tokens::BudgetState> {
        self.budget.as_ref().map(|b| b.lock().status())
    }

    pub fn reset_token_budget(&self) {
        if let Some(budget) = &self.budget {
            budget.lock().reset();
        }
    }

    /// Abort forward progress: stop in-flight streaming and return to
    /// idle. Already-appended events are never touched.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
        self.set_state(AgentState::Idle);
    }

    /// Start a turn from operator input. Input that is empty after
    /// trimming never starts a turn and appends nothing.
    #[instrument(skip(self, text), fields(thread_id = %self.thread_id))]
    pub async fn send_message(&self, text: &str) -> Result<(), EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let _turn = self.turn_gate.lock().await;
        self.append_event(
            ThreadEventType::UserMessage,
            serde_json::json!({"text": text}),
        )?;
        self.run_turns().await
    }

    /// Resume the conversation without new user input.
    #[instrument(skip(self), fields(thread_id = %self.thread_id))]
    pub async fn continue_conversation(&self) -> Result<(), EngineError> {
        let _turn = self.turn_gate.lock().await;
        self.run_turns().await
    }

    /// Resolve a pending tool call. Idempotent: a resolution for a call
    /// that already has a terminal result is recorded and ignored, and the
    /// batch count can never be decremented twice for one call.
    #[instrument(skip(self), fields(thread_id = %self.thread_id, call_id = %call_id))]
    pub async fn handle_approval_response(
        &self,
        call_id: &ToolCallId,
        decision: ApprovalDecision,
    ) -> Result<(), EngineError> {
        self.append_event(
            ThreadEventType::ToolApprovalResponse,
            serde_json::json!({"tool_call_id": call_id, "decision": decision}),
        )?;

        // Duplicate-execution guard: a call with a terminal result is done,
        // no matter how many resolutions arrive for it.
        if self.events.has_tool_result(&self.thread_id, call_id)? {
            warn!(call_id = %call_id, "approval response for already-resolved call ignored");
            return Ok(());
        }

        let Some(call) = self.events.find_tool_call(&self.thread_id, call_id)? else {
            warn!(call_id = %call_id, "approval response with no matching tool call ignored");
            return Ok(());
        };

        let result = match decision {
            ApprovalDecision::Deny => ToolResultMessage::error(call_id.clone(), DENIAL_MESSAGE),
            ApprovalDecision::AllowOnce | ApprovalDecision::AllowAlways => {
                if decision == ApprovalDecision::AllowAlways {
                    self.dispatcher.gate().remember_always(&call.name);
                }
                let ctx = self.tool_context();
                self.dispatcher.run_unchecked(&call, &ctx).await
            }
        };

        let resolution = self.finish_call(&call, result)?;
        if resolution == BatchResolution::Emptied {
            self.continue_if_quiescent().await?;
        }
        Ok(())
    }

    // --- internals ---

    fn emit(&self, event: AgentEvent) {
        // A send error only means no receivers are subscribed.
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, to: AgentState) {
        let mut state = self.state.lock();
        if *state != to {
            let from = *state;
            *state = to;
            drop(state);
            self.emit(AgentEvent::StateChange {
                thread_id: self.thread_id.clone(),
                from,
                to,
            });
        }
    }

    fn append_event(
        &self,
        event_type: ThreadEventType,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        let row = self.events.append(&self.thread_id, event_type, payload)?;
        self.emit(AgentEvent::ThreadEventAdded {
            thread_id: self.thread_id.clone(),
            event_id: row.id,
            event_type,
            sequence: row.sequence,
        });
        Ok(())
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            thread_id: self.thread_id.clone(),
            parent_thread_id: self.parent_thread_id.clone(),
            working_directory: self.working_directory.clone(),
            abort: self.cancel.lock().clone(),
        }
    }

    /// The turn loop. Caller must hold `turn_gate`.
    async fn run_turns(&self) -> Result<(), EngineError> {
        let cancel = {
            let mut token = self.cancel.lock();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            token.clone()
        };

        let mut turns = 0u32;
        loop {
            if cancel.is_cancelled() {
                self.set_state(AgentState::Idle);
                return Err(EngineError::Aborted);
            }

            turns += 1;
            if turns > self.config.max_turns {
                self.set_state(AgentState::Idle);
                return Err(EngineError::MaxTurnsExceeded(self.config.max_turns));
            }

            // Budget veto before the provider is invoked. Blocked attempts
            // re-warn every time; this is an operational signal, not a
            // failure.
            if let Some(budget) = &self.budget {
                let requested = self.config.stream_options.max_tokens.map(u64::from);
                let verdict = budget.lock().can_proceed(requested);
                if !verdict.allowed {
                    let usage = budget.lock().status();
                    self.emit(AgentEvent::BudgetWarning {
                        thread_id: self.thread_id.clone(),
                        message: verdict
                            .reason
                            .unwrap_or_else(|| "token budget exceeded".into()),
                        usage,
                        recommendations: vec![
                            "reset the token budget to continue".into(),
                            "start a new thread".into(),
                        ],
                    });
                    self.set_state(AgentState::Idle);
                    return Ok(());
                }
            }

            self.set_state(AgentState::Thinking);
            self.emit(AgentEvent::ThinkingStart {
                thread_id: self.thread_id.clone(),
            });

            let rows = self.events.list(&self.thread_id, None, None)?;
            let context = LlmContext {
                system_prompt: fold::system_prompt(&rows),
                messages: fold::fold_history(&rows),
                tools: self.dispatcher.registry().definitions(),
                working_directory: self.working_directory.clone(),
            };

            let stream = match self
                .provider
                .stream(&context, &self.config.stream_options)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    // Nothing is appended for the failed call itself.
                    self.emit(AgentEvent::Error {
                        thread_id: self.thread_id.clone(),
                        error: e.to_string(),
                        phase: "request".into(),
                    });
                    self.set_state(AgentState::Idle);
                    return Err(e.into());
                }
            };

            let message = match self.consume_stream(stream, &cancel).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    self.set_state(AgentState::Idle);
                    return Err(EngineError::Aborted);
                }
                Err(e) => {
                    self.emit(AgentEvent::Error {
                        thread_id: self.thread_id.clone(),
                        error: e.to_string(),
                        phase: "stream".into(),
                    });
                    self.set_state(AgentState::Idle);
                    return Err(e.into());
                }
            };

            self.emit(AgentEvent::ThinkingComplete {
                thread_id: self.thread_id.clone(),
            });

            self.record_usage(message.usage.as_ref());

            // Persist the assistant message with its raw text, thinking
            // markup and all.
            self.append_event(
                ThreadEventType::AgentMessage,
                serde_json::json!({
                    "text": message.raw_text(),
                    "usage": &message.usage,
                    "stop_reason": &message.stop_reason,
                }),
            )?;

            let calls: Vec<ToolCallBlock> =
                message.tool_calls().into_iter().cloned().collect();

            if calls.is_empty() {
                self.set_state(AgentState::Idle);
                self.emit(AgentEvent::ConversationComplete {
                    thread_id: self.thread_id.clone(),
                });
                return Ok(());
            }

            // One transition per response, whether or not any call pends.
            {
                let mut batch = self.batch.lock();
                for call in &calls {
                    batch.insert(call.id.clone());
                }
            }
            self.set_state(AgentState::ToolExecution);

            // Append tool_call events in provider order before dispatching,
            // so the contiguous run after the agent message is the batch.
            for call in &calls {
                self.append_event(ThreadEventType::ToolCall, serde_json::to_value(call)?)?;
            }

            // Optimistic dispatch; attempts run concurrently, completions
            // serialize through the append-and-resolve path.
            futures::future::join_all(calls.iter().map(|call| self.dispatch_one(call))).await;

            if self.batch.lock().is_empty() {
                // Everything resolved synchronously — recursive
                // continuation with the extended history.
                continue;
            }

            // At least one call awaits approval. The agent stays in
            // tool_execution until resolutions arrive — indefinitely, if
            // the operator never responds.
            return Ok(());
        }
    }

    /// Dispatch one call of the current batch. Pending persists the
    /// approval request and leaves the batch count held for this call.
    async fn dispatch_one(&self, call: &ToolCallBlock) {
        self.emit(AgentEvent::ToolCallStart {
            thread_id: self.thread_id.clone(),
            tool_name: call.name.clone(),
            input: call.arguments.clone(),
            call_id: call.id.clone(),
        });

        let ctx = self.tool_context();
        match self.dispatcher.dispatch(call, &ctx).await {
            DispatchOutcome::Done(result) => {
                if let Err(e) = self.finish_call(call, result) {
                    error!(error = %e, tool = %call.name, "failed to record tool result");
                }
            }
            DispatchOutcome::Pending => {
                let payload = serde_json::json!({
                    "tool_call_id": &call.id,
                    "tool_name": &call.name,
                    "arguments": &call.arguments,
                });
                if let Err(e) = self.append_event(ThreadEventType::ToolApprovalRequest, payload) {
                    error!(error = %e, tool = %call.name, "failed to persist approval request");
                }
            }
            DispatchOutcome::Failed(message) => {
                let result = ToolResultMessage::error(call.id.clone(), message);
                if let Err(e) = self.finish_call(call, result) {
                    error!(error = %e, tool = %call.name, "failed to record tool failure");
                }
            }
        }
    }

    /// Record a terminal result for a call: guarded append, completion
    /// event, batch resolution. The guard is re-checked inside the store
    /// immediately before the write, so two racing resolutions cannot both
    /// append.
    fn finish_call(
        &self,
        call: &ToolCallBlock,
        result: ToolResultMessage,
    ) -> Result<BatchResolution, EngineError> {
        let appended = self.events.append_tool_result(
            &self.thread_id,
            &call.id,
            serde_json::to_value(&result)?,
        )?;

        let Some(row) = appended else {
            warn!(call_id = %call.id, "duplicate tool result suppressed");
            return Ok(BatchResolution::NotMember);
        };

        self.emit(AgentEvent::ThreadEventAdded {
            thread_id: self.thread_id.clone(),
            event_id: row.id,
            event_type: ThreadEventType::ToolResult,
            sequence: row.sequence,
        });
        self.emit(AgentEvent::ToolCallComplete {
            thread_id: self.thread_id.clone(),
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            result,
        });

        Ok(self.batch.lock().resolve(&call.id))
    }

    /// Continuation triggered by the resolution that emptied the batch.
    /// Re-checked under the turn gate: if the machine already moved on
    /// (another continuation ran, or a new batch is outstanding), this is
    /// a no-op.
    async fn continue_if_quiescent(&self) -> Result<(), EngineError> {
        let _turn = self.turn_gate.lock().await;
        if self.state() != AgentState::ToolExecution || !self.batch.lock().is_empty() {
            return Ok(());
        }
        self.run_turns().await
    }

    /// Drain the provider stream, emitting one token event per chunk and
    /// switching to streaming on the first delta. Returns None if aborted.
    async fn consume_stream(
        &self,
        mut stream: Pin<Box<dyn Stream<Item = StreamEvent> + Send>>,
        cancel: &CancellationToken,
    ) -> Result<Option<AssistantMessage>, GatewayError> {
        let mut message = None;

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            match event {
                StreamEvent::TextDelta { delta } | StreamEvent::ThinkingDelta { delta } => {
                    self.set_state(AgentState::Streaming);
                    self.emit(AgentEvent::Token {
                        thread_id: self.thread_id.clone(),
                        token: delta,
                    });
                }
                StreamEvent::Done { message: m, .. } => {
                    message = Some(m);
                }
                StreamEvent::Error { error } => {
                    return Err(error);
                }
                _ => {}
            }
        }

        match message {
            Some(m) => Ok(Some(m)),
            None => Err(GatewayError::StreamInterrupted(
                "stream ended without a final message".into(),
            )),
        }
    }

    /// Fold real usage into the budget and the thread's accumulators.
    /// A response without usage data consumes nothing.
    fn record_usage(&self, usage: Option<&TokenUsage>) {
        let Some(usage) = usage else {
            return;
        };

        if let Some(budget) = &self.budget {
            let warning = budget
                .lock()
                .record_usage(u64::from(usage.prompt_tokens), u64::from(usage.completion_tokens));
            if let Some(warning) = warning {
                let status = budget.lock().status();
                self.emit(AgentEvent::BudgetWarning {
                    thread_id: self.thread_id.clone(),
                    message: warning.message,
                    usage: status,
                    recommendations: warning.recommendations,
                });
            }
        }

        match self.threads.get(&self.thread_id) {
            Ok(thread) => {
                let mut tokens = thread.tokens;
                tokens.accumulate(usage);
                if let Err(e) = self.threads.update_tokens(&self.thread_id, &tokens) {
                    error!(error = %e, "failed to update thread token counters");
                }
            }
            Err(e) => error!(error = %e, "failed to load thread for token update"),
        }
    }
}
