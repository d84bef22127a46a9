use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::protocol::AgentUpdate;
use super::routing::RoutingRules;
use super::AgentError;
use crate::llm::{GenerationConfig, LlmClient, LlmError, Message, Role, ToolCallRequest, ToolCallResponse};
use crate::mcp::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingModel,
    AwaitingTool,
}

/// One interactive session: a transcript plus the model and tools that extend it.
pub struct Conversation {
    llm_client: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    routing: RoutingRules,
    system_prompt: String,
    generation: GenerationConfig,
    state: ConversationState,
    transcript: Vec<Message>,
    agent_tx: Option<UnboundedSender<AgentUpdate>>,
}

impl Conversation {
    pub fn new(
        llm_client: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        routing: RoutingRules,
        system_prompt: impl Into<String>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            llm_client,
            registry,
            routing,
            system_prompt: system_prompt.into(),
            generation,
            state: ConversationState::Idle,
            transcript: Vec::new(),
            agent_tx: None,
        }
    }

    pub fn with_updates(mut self, agent_tx: UnboundedSender<AgentUpdate>) -> Self {
        self.agent_tx = Some(agent_tx);
        self
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// Most recent model-authored text, skipping tool-call-only replies.
    pub fn last_model_text(&self) -> Option<String> {
        self.transcript
            .iter()
            .rev()
            .filter(|message| message.role == Role::Model)
            .map(Message::text_content)
            .find(|text| !text.trim().is_empty())
    }

    /// Run one user turn to completion.
    ///
    /// The turn is built on a copy of the transcript and committed only when
    /// every generation and tool call succeeds, so an aborted turn never
    /// leaves an unanswered tool call behind.
    pub async fn process_message(&mut self, input: &str) -> Result<&[Message], AgentError> {
        let turn_id = Uuid::new_v4();
        let request = self.routing.clean(input);
        if request.len() != input.len() {
            log::debug!("🔀 Stripped routing prefix, request: {}", request);
        }
        self.emit(AgentUpdate::TurnStarted {
            turn_id,
            request: request.to_string(),
        });

        let mut working = self.transcript.clone();
        if working.is_empty() {
            working.push(Message::text(Role::System, self.system_prompt.clone()));
        }
        working.push(Message::text(Role::User, request));

        let outcome = self.run_turn(turn_id, &mut working).await;
        self.state = ConversationState::Idle;

        match outcome {
            Ok(()) => {
                self.transcript = working;
                Ok(&self.transcript)
            }
            Err(e) => {
                log::error!("❌ Turn {} aborted: {}", turn_id, e);
                Err(e)
            }
        }
    }

    async fn run_turn(&mut self, turn_id: Uuid, working: &mut Vec<Message>) -> Result<(), AgentError> {
        let reply = self.generate(turn_id, working).await?;
        let mut pending: VecDeque<ToolCallRequest> = reply.tool_calls().cloned().collect();
        working.push(reply);

        while let Some(call) = pending.pop_front() {
            self.state = ConversationState::AwaitingTool;
            let response = self.call_tool(turn_id, &call).await?;
            working.push(Message::tool_response(ToolCallResponse {
                name: call.name,
                response,
            }));

            let follow_up = self.generate(turn_id, working).await?;
            pending.extend(follow_up.tool_calls().cloned());
            working.push(follow_up);
        }

        Ok(())
    }

    async fn generate(&mut self, turn_id: Uuid, transcript: &[Message]) -> Result<Message, AgentError> {
        self.state = ConversationState::AwaitingModel;
        log::debug!("🤖 Generating with {} messages", transcript.len());

        let mut reply = self
            .llm_client
            .generate(transcript, self.registry.descriptors(), &self.generation)
            .await?;
        if reply.parts.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }
        reply.role = Role::Model;

        let tool_calls = reply.tool_calls().count();
        self.emit(AgentUpdate::ModelReply {
            turn_id,
            text: reply.text_content(),
            tool_calls,
        });
        Ok(reply)
    }

    async fn call_tool(&self, turn_id: Uuid, call: &ToolCallRequest) -> Result<Value, AgentError> {
        log::info!("🔧 Calling tool: {}", call.name);
        self.emit(AgentUpdate::ToolStarted {
            turn_id,
            name: call.name.clone(),
            params_json: call.arguments.to_string(),
        });

        let result = match self.registry.lookup(&call.name) {
            Ok(callable) => callable.call(call.arguments.clone()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => {
                self.emit(AgentUpdate::ToolResult {
                    turn_id,
                    name: call.name.clone(),
                    result_json: value.to_string(),
                });
                Ok(object_shaped(value))
            }
            Err(e) => {
                log::warn!("⚠️ Tool {} failed: {}", call.name, e);
                self.emit(AgentUpdate::ToolError {
                    turn_id,
                    name: call.name.clone(),
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    fn emit(&self, update: AgentUpdate) {
        if let Some(tx) = self.agent_tx.as_ref() {
            let _ = tx.send(update);
        }
    }
}

// Function responses must be JSON objects.
fn object_shaped(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "result": value })
    }
}
