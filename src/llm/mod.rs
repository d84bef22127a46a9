use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mcp::ToolDescriptor;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Model,
}

/// Model-requested tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a tool invocation, fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResponse {
    pub name: String,
    pub response: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Part {
    Text(String),
    ToolCall(ToolCallRequest),
    ToolResponse(ToolCallResponse),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::Text(text.into())])
    }

    /// Tool results travel with the user role.
    pub fn tool_response(response: ToolCallResponse) -> Self {
        Self::new(Role::User, vec![Part::ToolResponse(response)])
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }

    /// Concatenated text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Sampling settings held fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_output_tokens: 4096,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("model returned no usable content")]
    EmptyResponse,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate the next model message for `transcript`. The returned message
    /// carries text, tool-call requests, or both.
    async fn generate(
        &self,
        transcript: &[Message],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<Message, LlmError>;
}

pub mod gemini;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    /// Model stand-in that replays canned replies and records what it was shown.
    #[derive(Default)]
    pub(crate) struct ScriptedModel {
        replies: Mutex<VecDeque<Result<Message, LlmError>>>,
        /// (transcript length, tool count) per generation.
        pub seen: Mutex<Vec<(usize, usize)>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<Message, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedModel {
        async fn generate(
            &self,
            transcript: &[Message],
            tools: &[ToolDescriptor],
            _config: &GenerationConfig,
        ) -> Result<Message, LlmError> {
            self.seen.lock().push((transcript.len(), tools.len()));
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Api("script exhausted".to_string())))
        }
    }

    pub fn text(reply: &str) -> Result<Message, LlmError> {
        Ok(Message::text(Role::Model, reply))
    }

    /// A model reply requesting `names` in order, each against 10.0.0.1.
    pub fn calls(names: &[&str]) -> Result<Message, LlmError> {
        Ok(Message::new(
            Role::Model,
            names
                .iter()
                .map(|name| {
                    Part::ToolCall(ToolCallRequest {
                        name: name.to_string(),
                        arguments: json!({ "target": "10.0.0.1" }),
                    })
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_calls_iterates_in_order() {
        let message = Message::new(
            Role::Model,
            vec![
                Part::Text("Scanning now.".to_string()),
                Part::ToolCall(ToolCallRequest {
                    name: "ping_scan".to_string(),
                    arguments: json!({ "target": "10.0.0.1" }),
                }),
                Part::ToolCall(ToolCallRequest {
                    name: "port_scan".to_string(),
                    arguments: json!({ "target": "10.0.0.1", "ports": "22" }),
                }),
            ],
        );

        let names: Vec<&str> = message.tool_calls().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ping_scan", "port_scan"]);
        assert!(message.has_tool_calls());
        assert_eq!(message.text_content(), "Scanning now.");
    }

    #[test]
    fn test_tool_response_uses_user_role() {
        let message = Message::tool_response(ToolCallResponse {
            name: "ping_scan".to_string(),
            response: json!({ "result": "up" }),
        });
        assert_eq!(message.role, Role::User);
        assert!(!message.has_tool_calls());
    }
}
