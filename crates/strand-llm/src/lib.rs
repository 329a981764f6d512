pub mod anthropic;
pub mod mock;
pub mod reliable;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockResponse};
pub use reliable::{ReliableConfig, ReliableProvider};
