use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::errors::McpError;
use super::protocol::ToolDescriptor;

/// A connection to one tool provider.
#[async_trait::async_trait]
pub trait MCPTransport: Send + Sync {
    async fn connect(&mut self) -> Result<(), McpError>;
    /// Best-effort teardown; never fails, and may be called repeatedly.
    async fn disconnect(&mut self) -> Result<(), McpError>;
    fn is_connected(&self) -> bool;
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;
    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, McpError>;
}

pub type SharedTransport = Arc<RwLock<dyn MCPTransport>>;
