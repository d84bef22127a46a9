pub mod loop_engine;
pub mod protocol;
pub mod routing;

use thiserror::Error;

use crate::llm::LlmError;
use crate::mcp::McpError;

pub use loop_engine::Conversation;
pub use protocol::AgentUpdate;
pub use routing::RoutingRules;

/// Anything that aborts a conversation turn.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}
