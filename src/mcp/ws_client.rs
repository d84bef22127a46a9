use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;

use super::channel::Channel;
use super::errors::McpError;
use super::process::{ProcessTransport, ServerParameters};
use super::protocol::ToolDescriptor;
use super::rpc::RpcClient;
use super::MCPTransport;

pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider connection: spawns the process, opens a websocket to the endpoint
/// it announces, and speaks JSON-RPC over it.
pub struct WsMCPClient {
    params: ServerParameters,
    endpoint_timeout: Duration,
    process: Option<ProcessTransport>,
    rpc: Option<RpcClient>,
}

impl WsMCPClient {
    pub fn new(params: ServerParameters) -> Self {
        Self {
            params,
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
            process: None,
            rpc: None,
        }
    }

    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.process.as_ref().map(|p| p.endpoint())
    }

    fn rpc(&self) -> Result<&RpcClient, McpError> {
        match (&self.process, &self.rpc) {
            (Some(process), Some(rpc)) if process.is_alive() && rpc.channel().is_open() => Ok(rpc),
            _ => Err(McpError::NotConnected),
        }
    }
}

#[async_trait]
impl MCPTransport for WsMCPClient {
    async fn connect(&mut self) -> Result<(), McpError> {
        if self.rpc.is_some() {
            debug!("Provider {} already connected", self.params.command);
            return Ok(());
        }

        let mut process = ProcessTransport::launch(&self.params, self.endpoint_timeout).await?;
        let channel = match Channel::open(process.endpoint()).await {
            Ok(channel) => channel,
            Err(e) => {
                process.shutdown().await;
                return Err(e);
            }
        };
        info!("Connected to provider {} at {}", self.params.command, process.endpoint());

        self.rpc = Some(RpcClient::new(channel));
        self.process = Some(process);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), McpError> {
        if let Some(rpc) = self.rpc.take() {
            let channel: Arc<Channel> = rpc.channel().clone();
            drop(rpc);
            channel.close().await;
        }
        if let Some(mut process) = self.process.take() {
            process.shutdown().await;
            info!("Disconnected from provider {}", self.params.command);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.rpc().is_ok()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.rpc()?.list_tools().await
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.rpc()?.invoke(name, arguments).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mcp::testing::{catalog_handler, scripted_server};
    use serde_json::json;
    use std::collections::HashMap;

    fn announce(addr: std::net::SocketAddr) -> ServerParameters {
        ServerParameters {
            command: "/bin/sh".to_string(),
            args: vec![
                "-c".to_string(),
                format!("echo 'provider ready on ws://{addr}'; sleep 30"),
            ],
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_connect_discover_invoke_disconnect() {
        let addr = scripted_server(catalog_handler(
            json!({ "tools": [{ "name": "port_scan", "description": "Scan ports" }] }),
            HashMap::new(),
        ))
        .await;
        let mut client = WsMCPClient::new(announce(addr));

        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.endpoint(), Some(format!("ws://{addr}").as_str()));

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "port_scan");

        let result = client
            .invoke("port_scan", json!({ "target": "10.0.0.1", "ports": "22,80" }))
            .await
            .unwrap();
        assert_eq!(result["echo"]["ports"], "22,80");

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
        client.disconnect().await.unwrap();

        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let client = WsMCPClient::new(announce("127.0.0.1:9".parse().unwrap()));
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            client.invoke("port_scan", json!({})).await,
            Err(McpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let mut client = WsMCPClient::new(announce("127.0.0.1:9".parse().unwrap()));
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_endpoint_timeout_leaves_nothing_open() {
        let params = ServerParameters {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            env: HashMap::new(),
        };
        let mut client = WsMCPClient::new(params).with_endpoint_timeout(Duration::from_millis(200));

        assert!(matches!(
            client.connect().await,
            Err(McpError::EndpointTimeout { .. })
        ));
        assert!(!client.is_connected());
        assert!(client.endpoint().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_shuts_process_down() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = WsMCPClient::new(announce(addr));
        assert!(matches!(
            client.connect().await,
            Err(McpError::Connect { .. })
        ));
        assert!(client.endpoint().is_none());
    }

    #[tokio::test]
    async fn test_provider_exit_means_not_connected() {
        let addr = scripted_server(catalog_handler(json!([]), HashMap::new())).await;
        let params = ServerParameters {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), format!("echo ws://{addr}; sleep 0.3")],
            env: HashMap::new(),
        };
        let mut client = WsMCPClient::new(params);
        client.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotConnected)
        ));
        client.disconnect().await.unwrap();
    }
}
