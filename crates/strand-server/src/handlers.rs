//! JSON-RPC control surface handlers.

use std::sync::Arc;

use strand_core::approval::ApprovalDecision;
use strand_core::events::ThreadEventType;
use strand_core::ids::{ThreadId, ToolCallId};
use strand_store::events::EventRepo;
use strand_store::threads::{ThreadRepo, ThreadStatus};
use strand_store::Database;

use crate::orchestrator::AgentManager;
use crate::rpc::{optional_i64, optional_str, require_str, RpcResponse};

pub struct HandlerState {
    pub threads: ThreadRepo,
    pub events: EventRepo,
    pub manager: Arc<AgentManager>,
}

impl HandlerState {
    pub fn new(db: Database, manager: Arc<AgentManager>) -> Self {
        Self {
            threads: ThreadRepo::new(db.clone()),
            events: EventRepo::new(db),
            manager,
        }
    }
}

/// Dispatch one RPC request to its handler.
pub async fn dispatch(
    state: &HandlerState,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        "health" => RpcResponse::success(id, serde_json::json!({"status": "healthy"})),
        "thread.create" => thread_create(state, params, id),
        "thread.list" => thread_list(state, params, id),
        "thread.events" => thread_events(state, params, id),
        "agent.message" => agent_message(state, params, id),
        "agent.continue" => agent_continue(state, params, id),
        "agent.approval" => agent_approval(state, params, id),
        "agent.abort" => agent_abort(state, params, id),
        "agent.status" => agent_status(state, params, id),
        "budget.status" => budget_status(state, params, id),
        "budget.reset" => budget_reset(state, params, id),
        other => RpcResponse::method_not_found(id, other),
    }
}

fn parse_thread_id(params: &serde_json::Value) -> Result<ThreadId, String> {
    require_str(params, "thread_id").map(ThreadId::from_raw)
}

fn thread_create(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let model = optional_str(params, "model")
        .unwrap_or_else(|| state.manager.provider_model())
        .to_string();
    let working_directory = optional_str(params, "working_directory")
        .unwrap_or("/tmp")
        .to_string();
    let parent = optional_str(params, "parent_thread_id").map(ThreadId::from_raw);

    let thread = match state.threads.create(
        &model,
        state.manager.provider_name(),
        &working_directory,
        parent.as_ref(),
    ) {
        Ok(thread) => thread,
        Err(e) => return RpcResponse::internal_error(id, e.to_string()),
    };

    // A system prompt configures the thread's provider calls; it is
    // persisted as an event but never folded into the dialogue.
    if let Some(system_prompt) = optional_str(params, "system_prompt") {
        if let Err(e) = state.events.append(
            &thread.id,
            ThreadEventType::SystemPrompt,
            serde_json::json!({"text": system_prompt}),
        ) {
            return RpcResponse::internal_error(id, e.to_string());
        }
    }

    match serde_json::to_value(&thread) {
        Ok(value) => RpcResponse::success(id, serde_json::json!({"thread": value})),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn thread_list(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let status = match optional_str(params, "status") {
        Some(raw) => match raw.parse::<ThreadStatus>() {
            Ok(status) => Some(status),
            Err(e) => return RpcResponse::invalid_params(id, e),
        },
        None => None,
    };
    let limit = optional_i64(params, "limit").unwrap_or(50) as u32;
    let offset = optional_i64(params, "offset").unwrap_or(0) as u32;

    match state.threads.list(status.as_ref(), limit, offset) {
        Ok(threads) => match serde_json::to_value(&threads) {
            Ok(value) => RpcResponse::success(id, serde_json::json!({"threads": value})),
            Err(e) => RpcResponse::internal_error(id, e.to_string()),
        },
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn thread_events(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let thread_id = match parse_thread_id(params) {
        Ok(tid) => tid,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let result = match optional_i64(params, "after_sequence") {
        Some(after) => state.events.list_after_sequence(&thread_id, after, 1000),
        None => state.events.list(&thread_id, None, None),
    };

    match result {
        Ok(events) => match serde_json::to_value(&events) {
            Ok(value) => RpcResponse::success(id, serde_json::json!({"events": value})),
            Err(e) => RpcResponse::internal_error(id, e.to_string()),
        },
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn agent_message(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let thread_id = match parse_thread_id(params) {
        Ok(tid) => tid,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let text = match require_str(params, "text") {
        Ok(text) => text,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.manager.prompt(&thread_id, text) {
        Ok(result) => RpcResponse::success(id, serde_json::json!({"run_id": result.run_id})),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn agent_continue(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let thread_id = match parse_thread_id(params) {
        Ok(tid) => tid,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.manager.continue_thread(&thread_id) {
        Ok(result) => RpcResponse::success(id, serde_json::json!({"run_id": result.run_id})),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn agent_approval(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let thread_id = match parse_thread_id(params) {
        Ok(tid) => tid,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let call_id = match require_str(params, "call_id") {
        Ok(raw) => ToolCallId::from_raw(raw),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let decision = match require_str(params, "decision") {
        Ok(raw) => match raw.parse::<ApprovalDecision>() {
            Ok(decision) => decision,
            Err(e) => return RpcResponse::invalid_params(id, e),
        },
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.manager.resolve_approval(&thread_id, call_id, decision) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"accepted": true})),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn agent_abort(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let thread_id = match parse_thread_id(params) {
        Ok(tid) => tid,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let aborted = state.manager.abort(&thread_id);
    RpcResponse::success(id, serde_json::json!({"aborted": aborted}))
}

fn agent_status(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let thread_id = match parse_thread_id(params) {
        Ok(tid) => tid,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let status = state.manager.status(&thread_id);
    RpcResponse::success(
        id,
        serde_json::json!({
            "state": status.state,
            "pending_tool_calls": status.pending_tool_calls,
        }),
    )
}

fn budget_status(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let thread_id = match parse_thread_id(params) {
        Ok(tid) => tid,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.manager.budget_status(&thread_id) {
        Ok(Some(status)) => match serde_json::to_value(&status) {
            Ok(mut value) => {
                value["effective_limit"] = serde_json::json!(status.effective_limit());
                value["available_tokens"] = serde_json::json!(status.available_tokens());
                value["usage_percentage"] = serde_json::json!(status.usage_percentage());
                RpcResponse::success(id, serde_json::json!({"budget": value}))
            }
            Err(e) => RpcResponse::internal_error(id, e.to_string()),
        },
        Ok(None) => RpcResponse::success(id, serde_json::json!({"budget": null})),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn budget_reset(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let thread_id = match parse_thread_id(params) {
        Ok(tid) => tid,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.manager.reset_budget(&thread_id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"reset": true})),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}
