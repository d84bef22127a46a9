pub mod channel;
pub mod errors;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod rpc;
pub mod transport;
pub mod ws_client;

pub use errors::McpError;
pub use process::ServerParameters;
pub use protocol::ToolDescriptor;
pub use registry::ToolRegistry;
pub use transport::{MCPTransport, SharedTransport};
pub use ws_client::WsMCPClient;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::RwLock;
    use tokio_tungstenite::tungstenite::Message;

    use super::{MCPTransport, McpError, SharedTransport, ToolDescriptor};

    /// Websocket provider stand-in. Every inbound request is passed to
    /// `handler`; each returned value is sent back as its own frame.
    pub(crate) async fn scripted_server<F>(handler: F) -> SocketAddr
    where
        F: Fn(Value) -> Vec<Value> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let Message::Text(text) = msg else { continue };
                        let request: Value = serde_json::from_str(text.as_str()).unwrap();
                        for reply in handler(request) {
                            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    /// Answers `tools/list` with `tools` and `tools/call` by echoing the
    /// arguments, or with an error for tools named in `failing`.
    pub(crate) fn catalog_handler(
        tools: Value,
        failing: HashMap<String, String>,
    ) -> impl Fn(Value) -> Vec<Value> + Send + Sync + 'static {
        move |request| {
            let id = request["id"].clone();
            let reply = match request["method"].as_str() {
                Some("tools/list") => json!({ "jsonrpc": "2.0", "id": id, "result": tools.clone() }),
                Some("tools/call") => {
                    let name = request["params"]["name"].as_str().unwrap_or_default();
                    match failing.get(name) {
                        Some(message) => json!({ "jsonrpc": "2.0", "id": id, "error": { "message": message } }),
                        None => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": { "tool": name, "echo": request["params"]["arguments"].clone() }
                        }),
                    }
                }
                _ => json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": "method not found" } }),
            };
            vec![reply]
        }
    }

    /// In-memory provider for registry and orchestrator tests.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub tools: Vec<ToolDescriptor>,
        pub catalog_error: Option<String>,
        pub results: HashMap<String, Value>,
        pub failures: HashMap<String, String>,
        pub calls: Mutex<Vec<(String, Value)>>,
    }

    impl FakeTransport {
        pub fn with_tools(names: &[&str]) -> Self {
            Self {
                tools: names
                    .iter()
                    .map(|name| ToolDescriptor {
                        name: name.to_string(),
                        description: format!("{name} tool"),
                        parameters: json!({
                            "type": "object",
                            "properties": { "target": { "type": "string" } },
                            "required": ["target"]
                        }),
                    })
                    .collect(),
                ..Default::default()
            }
        }

        pub fn shared(self) -> (Arc<RwLock<FakeTransport>>, SharedTransport) {
            let fake = Arc::new(RwLock::new(self));
            let shared: SharedTransport = fake.clone();
            (fake, shared)
        }
    }

    #[async_trait]
    impl MCPTransport for FakeTransport {
        async fn connect(&mut self) -> Result<(), McpError> {
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), McpError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
            match &self.catalog_error {
                Some(message) => Err(McpError::Protocol(message.clone())),
                None => Ok(self.tools.clone()),
            }
        }

        async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
            self.calls.lock().push((name.to_string(), arguments.clone()));
            if let Some(message) = self.failures.get(name) {
                return Err(McpError::RemoteTool(message.clone()));
            }
            Ok(self
                .results
                .get(name)
                .cloned()
                .unwrap_or_else(|| json!({ "content": [{ "type": "text", "text": format!("{name} done") }] })))
        }
    }
}
