use strand_core::errors::GatewayError;
use strand_core::tools::ToolError;
use strand_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("agent aborted")]
    Aborted,

    #[error("max turns exceeded: {0}")]
    MaxTurnsExceeded(u32),

    #[error("{0}")]
    Internal(String),
}
