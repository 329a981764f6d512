pub mod client;
pub mod event_bridge;
pub mod handlers;
pub mod orchestrator;
pub mod rpc;
pub mod server;

pub use orchestrator::AgentManager;
pub use server::{start, ServerConfig, ServerHandle};
