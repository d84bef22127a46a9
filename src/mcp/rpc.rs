//! JSON-RPC request/response correlation over one [`Channel`].
//!
//! A dispatcher task is the channel's only reader. It routes each inbound
//! response to the pending request whose id it carries. A response without an
//! id goes to the sole pending request, if there is exactly one.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::channel::Channel;
use super::errors::McpError;
use super::protocol::{parse_tool_catalog, MCPRequest, MCPResponse, ToolDescriptor};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<MCPResponse>>>>;

pub struct RpcClient {
    channel: Arc<Channel>,
    pending: PendingMap,
    dispatcher: JoinHandle<()>,
}

impl RpcClient {
    pub fn new(channel: Arc<Channel>) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = tokio::spawn(dispatch(channel.clone(), pending.clone()));
        Self {
            channel,
            pending,
            dispatcher,
        }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send one request and wait for its response. There is no timeout.
    pub async fn request(&self, build: impl FnOnce(u64) -> MCPRequest) -> Result<MCPResponse, McpError> {
        if !self.channel.is_open() {
            return Err(McpError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock();
            let mut id = u64::from(rand::random::<u32>());
            while pending.contains_key(&id) {
                id = u64::from(rand::random::<u32>());
            }
            pending.insert(id, tx);
            id
        };
        // The dispatcher may have drained the map just before the insert.
        if !self.channel.is_open() {
            self.pending.lock().remove(&id);
            return Err(McpError::Closed);
        }

        let request = build(id);
        debug!("MCP request {} -> {}", id, request.method);
        let encoded = match serde_json::to_string(&request) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.pending.lock().remove(&id);
                return Err(McpError::Transport(format!("failed to encode request: {e}")));
            }
        };
        if let Err(e) = self.channel.write(encoded).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| McpError::Closed)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let response = self.request(MCPRequest::tools_list).await?;
        if let Some(error) = response.error {
            return Err(McpError::Protocol(error.message));
        }
        match response.result {
            Some(result) => parse_tool_catalog(result),
            None => Err(McpError::Protocol(
                "response carries neither result nor error".to_string(),
            )),
        }
    }

    /// Invoke a tool and return its raw result payload.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let response = self
            .request(|id| MCPRequest::tools_call(id, name, arguments))
            .await?;
        if let Some(error) = response.error {
            return Err(McpError::RemoteTool(error.message));
        }
        response.result.ok_or_else(|| {
            McpError::Protocol("response carries neither result nor error".to_string())
        })
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(channel: Arc<Channel>, pending: PendingMap) {
    loop {
        match channel.read().await {
            Ok(text) => route(&pending, &text),
            Err(e) => {
                debug!("Dispatcher for {} stopping: {}", channel.endpoint(), e);
                break;
            }
        }
    }
    // Dropping the senders fails every outstanding request with `Closed`.
    pending.lock().clear();
}

fn route(pending: &PendingMap, text: &str) {
    let response: MCPResponse = match serde_json::from_str(text) {
        Ok(response) => response,
        Err(e) => {
            warn!("Ignoring unparseable message from provider: {}", e);
            return;
        }
    };
    if response.is_notification() {
        debug!("Provider notification: {:?}", response.method);
        return;
    }

    let mut pending = pending.lock();
    let slot = match response.id {
        Some(id) => pending.remove(&id),
        None if pending.len() == 1 => pending
            .keys()
            .next()
            .copied()
            .and_then(|id| pending.remove(&id)),
        None => None,
    };
    match slot {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => warn!("Dropping response with no matching request (id {:?})", response.id),
    }
}
