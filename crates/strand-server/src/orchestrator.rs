//! Per-thread agent orchestration — connects the engine to the server.
//!
//! The manager owns one live `ConversationAgent` per thread, created
//! lazily from the store (which also recovers any pending batch). Prompt
//! and approval work runs in background tasks; progress reaches clients
//! through the shared event broadcast.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use strand_core::approval::ApprovalDecision;
use strand_core::events::{AgentEvent, AgentState};
use strand_core::ids::{ThreadId, ToolCallId};
use strand_core::provider::LlmProvider;
use strand_core::tokens::BudgetState;
use strand_engine::agent::{AgentConfig, ConversationAgent};
use strand_engine::budget::BudgetConfig;
use strand_engine::dispatch::ToolDispatcher;
use strand_engine::error::EngineError;
use strand_store::Database;

/// Result of accepting a prompt.
#[derive(Debug, Clone)]
pub struct PromptResult {
    pub run_id: String,
}

/// Snapshot of a thread's agent for status queries.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub state: AgentState,
    pub pending_tool_calls: usize,
}

pub struct AgentManager {
    db: Database,
    provider: Arc<dyn LlmProvider>,
    dispatcher: Arc<ToolDispatcher>,
    event_tx: broadcast::Sender<AgentEvent>,
    budget: Option<BudgetConfig>,
    agents: DashMap<ThreadId, Arc<ConversationAgent>>,
}

impl AgentManager {
    pub fn new(
        db: Database,
        provider: Arc<dyn LlmProvider>,
        dispatcher: Arc<ToolDispatcher>,
        event_tx: broadcast::Sender<AgentEvent>,
        budget: Option<BudgetConfig>,
    ) -> Self {
        Self {
            db,
            provider,
            dispatcher,
            event_tx,
            budget,
            agents: DashMap::new(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn provider_model(&self) -> &str {
        self.provider.model()
    }

    /// Get the live agent for a thread, creating it from the store on
    /// first use (this also recovers a pending batch after a restart).
    pub fn get_or_create(&self, thread_id: &ThreadId) -> Result<Arc<ConversationAgent>, EngineError> {
        use dashmap::mapref::entry::Entry;

        match self.agents.entry(thread_id.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let config = AgentConfig {
                    budget: self.budget.clone(),
                    ..AgentConfig::default()
                };
                let agent = Arc::new(ConversationAgent::new(
                    Arc::clone(&self.provider),
                    Arc::clone(&self.dispatcher),
                    self.db.clone(),
                    self.event_tx.clone(),
                    thread_id.clone(),
                    config,
                )?);
                let _ = entry.insert(Arc::clone(&agent));
                Ok(agent)
            }
        }
    }

    /// Accept a prompt and run the turn in the background.
    pub fn prompt(&self, thread_id: &ThreadId, text: &str) -> Result<PromptResult, EngineError> {
        let agent = self.get_or_create(thread_id)?;

        match agent.state() {
            AgentState::Thinking | AgentState::Streaming => {
                return Err(EngineError::Internal(
                    "thread already has an active run".into(),
                ));
            }
            AgentState::ToolExecution => {
                return Err(EngineError::Internal(
                    "thread is awaiting tool approvals".into(),
                ));
            }
            AgentState::Idle => {}
        }

        let run_id = Uuid::now_v7().to_string();
        let text = text.to_string();
        let thread_id = thread_id.clone();
        tokio::spawn(async move {
            if let Err(e) = agent.send_message(&text).await {
                tracing::warn!(thread_id = %thread_id, error = %e, "agent run failed");
            }
        });

        Ok(PromptResult { run_id })
    }

    /// Resume a thread without new user input.
    pub fn continue_thread(&self, thread_id: &ThreadId) -> Result<PromptResult, EngineError> {
        let agent = self.get_or_create(thread_id)?;
        let run_id = Uuid::now_v7().to_string();
        let thread_id = thread_id.clone();
        tokio::spawn(async move {
            if let Err(e) = agent.continue_conversation().await {
                tracing::warn!(thread_id = %thread_id, error = %e, "continuation failed");
            }
        });
        Ok(PromptResult { run_id })
    }

    /// Route an approval resolution to the thread's agent.
    pub fn resolve_approval(
        &self,
        thread_id: &ThreadId,
        call_id: ToolCallId,
        decision: ApprovalDecision,
    ) -> Result<(), EngineError> {
        let agent = self.get_or_create(thread_id)?;
        let thread_id = thread_id.clone();
        tokio::spawn(async move {
            if let Err(e) = agent.handle_approval_response(&call_id, decision).await {
                tracing::warn!(thread_id = %thread_id, error = %e, "approval handling failed");
            }
        });
        Ok(())
    }

    /// Abort a thread's active run. Returns false if no agent is live.
    pub fn abort(&self, thread_id: &ThreadId) -> bool {
        match self.agents.get(thread_id) {
            Some(agent) => {
                agent.stop();
                true
            }
            None => false,
        }
    }

    pub fn status(&self, thread_id: &ThreadId) -> AgentStatus {
        match self.agents.get(thread_id) {
            Some(agent) => AgentStatus {
                state: agent.state(),
                pending_tool_calls: agent.pending_tool_calls(),
            },
            None => AgentStatus {
                state: AgentState::Idle,
                pending_tool_calls: 0,
            },
        }
    }

    pub fn budget_status(&self, thread_id: &ThreadId) -> Result<Option<BudgetState>, EngineError> {
        Ok(self.get_or_create(thread_id)?.token_budget_status())
    }

    pub fn reset_budget(&self, thread_id: &ThreadId) -> Result<(), EngineError> {
        self.get_or_create(thread_id)?.reset_token_budget();
        Ok(())
    }
}
