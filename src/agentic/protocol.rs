use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress events emitted while a conversation turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentUpdate {
    TurnStarted {
        turn_id: Uuid,
        request: String,
    },
    ToolStarted {
        turn_id: Uuid,
        name: String,
        params_json: String,
    },
    ToolResult {
        turn_id: Uuid,
        name: String,
        result_json: String,
    },
    ToolError {
        turn_id: Uuid,
        name: String,
        error: String,
    },
    ModelReply {
        turn_id: Uuid,
        text: String,
        tool_calls: usize,
    },
}
