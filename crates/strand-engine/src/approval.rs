//! Approval gate: the synchronous decision half of the approval protocol.
//!
//! The gate answers "may this call run right now" — Allow, Deny, or
//! Pending. A Pending call is suspended by the agent until an operator
//! resolution arrives out of band; the gate itself manages no time and no
//! retries.

use std::collections::HashSet;

use parking_lot::RwLock;

use strand_core::approval::GateDecision;
use strand_core::messages::ToolCallBlock;

pub trait ApprovalGate: Send + Sync {
    fn request_decision(&self, call: &ToolCallBlock) -> GateDecision;

    /// Record an allow_always resolution: future calls to this tool pass
    /// without approval for the lifetime of the gate.
    fn remember_always(&self, tool_name: &str);
}

/// Name-set policy gate: tools on the allow list run immediately, tools on
/// the deny list are refused immediately, everything else waits for an
/// operator decision. How the lists are chosen is configuration, not this
/// component's concern.
pub struct PolicyGate {
    allowed: HashSet<String>,
    denied: HashSet<String>,
    always: RwLock<HashSet<String>>,
}

impl PolicyGate {
    pub fn new(
        allowed: impl IntoIterator<Item = String>,
        denied: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            denied: denied.into_iter().collect(),
            always: RwLock::new(HashSet::new()),
        }
    }

    /// Gate with the read-only built-ins pre-approved.
    pub fn default_policy() -> Self {
        Self::new(
            ["read_file".to_string(), "list_dir".to_string()],
            [],
        )
    }
}

impl ApprovalGate for PolicyGate {
    fn request_decision(&self, call: &ToolCallBlock) -> GateDecision {
        if self.denied.contains(&call.name) {
            return GateDecision::Deny;
        }
        if self.allowed.contains(&call.name) || self.always.read().contains(&call.name) {
            return GateDecision::Allow;
        }
        GateDecision::Pending
    }

    fn remember_always(&self, tool_name: &str) {
        let _ = self.always.write().insert(tool_name.to_string());
    }
}

/// Gate that approves everything. Used in tests and headless runs where
/// the operator has opted out of approvals entirely.
pub struct AllowAllGate;

impl ApprovalGate for AllowAllGate {
    fn request_decision(&self, _call: &ToolCallBlock) -> GateDecision {
        GateDecision::Allow
    }

    fn remember_always(&self, _tool_name: &str) {}
}
