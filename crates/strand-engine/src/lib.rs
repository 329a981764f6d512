//! The conversation engine: agent state machine, batch tracking, budget
//! monitoring, approval gating, and tool dispatch.

pub mod agent;
pub mod approval;
pub mod batch;
pub mod budget;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod tools;
pub mod truncate;

pub use agent::{AgentConfig, ConversationAgent};
pub use approval::{AllowAllGate, ApprovalGate, PolicyGate};
pub use batch::BatchTracker;
pub use budget::{BudgetConfig, TokenBudget};
pub use dispatch::{DispatchOutcome, ToolDispatcher};
pub use error::EngineError;
pub use registry::ToolRegistry;
