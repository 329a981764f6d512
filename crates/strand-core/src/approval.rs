use serde::{Deserialize, Serialize};

/// Fixed message recorded when a tool call is denied, either synchronously
/// by the gate or by an operator's deny resolution.
pub const DENIAL_MESSAGE: &str = "Tool call denied by approval policy";

/// Operator resolution for a pending tool call, delivered out of band as a
/// `tool_approval_response` event.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    AllowOnce,
    AllowAlways,
    Deny,
}

impl std::str::FromStr for ApprovalDecision {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow_once" => Ok(Self::AllowOnce),
            "allow_always" => Ok(Self::AllowAlways),
            "deny" => Ok(Self::Deny),
            other => Err(format!("unknown approval decision: {other}")),
        }
    }
}

/// Synchronous verdict from the approval gate at dispatch time.
/// `Pending` suspends exactly that call until a resolution event arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny,
    Pending,
}
