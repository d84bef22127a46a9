use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::errors::McpError;

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

#[derive(Debug, Serialize, Deserialize)]
pub struct MCPRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// Inbound envelope. Only `result` or `error` makes it a response; a `method`
/// with neither is a server notification.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct MCPResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<MCPError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MCPError {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A tool advertised by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub parameters: Value,
}

// Keeps `"result": null` distinct from a missing `result`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl MCPRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    pub fn tools_list(id: u64) -> Self {
        Self::new(id, METHOD_TOOLS_LIST, serde_json::json!({}))
    }

    pub fn tools_call(id: u64, name: &str, arguments: Value) -> Self {
        Self::new(
            id,
            METHOD_TOOLS_CALL,
            serde_json::json!({
                "name": name,
                "arguments": arguments
            }),
        )
    }
}

impl MCPResponse {
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.result.is_none() && self.error.is_none()
    }
}

/// Parse a discovery result. Accepts a bare array of descriptors or the MCP
/// `{ "tools": [...] }` wrapper.
pub fn parse_tool_catalog(result: Value) -> Result<Vec<ToolDescriptor>, McpError> {
    let tools = match result {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("tools") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(McpError::Protocol(
                    "discovery result has no 'tools' array".to_string(),
                ))
            }
        },
        other => {
            return Err(McpError::Protocol(format!(
                "unexpected discovery result: {other}"
            )))
        }
    };

    tools
        .into_iter()
        .map(|tool| {
            serde_json::from_value::<ToolDescriptor>(tool)
                .map_err(|e| McpError::Protocol(format!("malformed tool descriptor: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_fields() {
        let request = MCPRequest::tools_call(7, "port_scan", json!({ "target": "10.0.0.1" }));
        let encoded = serde_json::to_value(&request).unwrap();

        assert_eq!(encoded["jsonrpc"], "2.0");
        assert_eq!(encoded["id"], 7);
        assert_eq!(encoded["method"], "tools/call");
        assert_eq!(encoded["params"]["name"], "port_scan");
        assert_eq!(encoded["params"]["arguments"]["target"], "10.0.0.1");
    }

    #[test]
    fn test_response_with_error_envelope() {
        let response: MCPResponse =
            serde_json::from_str(r#"{"error":{"message":"timeout"}}"#).unwrap();
        assert!(response.id.is_none());
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().message, "timeout");
    }

    #[test]
    fn test_notification_detection() {
        let response: MCPResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
        assert!(response.is_notification());

        let response: MCPResponse = serde_json::from_str(r#"{"id":1,"result":null}"#).unwrap();
        assert!(!response.is_notification());
        assert_eq!(response.result, Some(Value::Null));
    }

    #[test]
    fn test_parse_tool_catalog_bare_array() {
        let tools = parse_tool_catalog(json!([
            { "name": "port_scan", "description": "Scan ports", "inputSchema": { "type": "object" } }
        ]))
        .unwrap();

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "port_scan");
        assert_eq!(tools[0].parameters, json!({ "type": "object" }));
    }

    #[test]
    fn test_parse_tool_catalog_wrapped() {
        let tools = parse_tool_catalog(json!({
            "tools": [
                { "name": "ping_scan", "description": "Ping" },
                { "name": "os_detection", "description": "OS" }
            ]
        }))
        .unwrap();

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1].name, "os_detection");
        assert_eq!(tools[0].parameters["type"], "object");
    }

    #[test]
    fn test_parse_tool_catalog_rejects_garbage() {
        assert!(matches!(
            parse_tool_catalog(json!("nope")),
            Err(McpError::Protocol(_))
        ));
        assert!(matches!(
            parse_tool_catalog(json!({ "items": [] })),
            Err(McpError::Protocol(_))
        ));
        assert!(matches!(
            parse_tool_catalog(json!([{ "description": "no name" }])),
            Err(McpError::Protocol(_))
        ));
    }
}
