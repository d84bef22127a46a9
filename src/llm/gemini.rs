use super::*;
use crate::config::LlmProfile;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default = "empty_args")]
    args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

pub struct GeminiClient {
    client: Client,
    profile: LlmProfile,
}

impl GeminiClient {
    pub fn new(profile: LlmProfile) -> Result<Self, LlmError> {
        if profile.api_key.trim().is_empty() {
            return Err(LlmError::Config("Gemini API key is empty".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            profile,
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.profile.endpoint.trim_end_matches('/'),
            self.profile.model
        )
    }

    /// Sanitize JSON Schema to only include fields supported by Gemini API
    /// Gemini only supports: type, nullable, required, format, description, properties, items, enum
    fn sanitize_schema(schema: serde_json::Value) -> serde_json::Value {
        match schema {
            serde_json::Value::Object(mut map) => {
                for unsupported in [
                    "additionalProperties",
                    "$ref",
                    "$defs",
                    "$schema",
                    "title",
                    "default",
                    "optional",
                    "maximum",
                    "minimum",
                    "exclusiveMaximum",
                    "exclusiveMinimum",
                    "oneOf",
                    "anyOf",
                    "allOf",
                    "not",
                    "pattern",
                    "minLength",
                    "maxLength",
                    "minItems",
                    "maxItems",
                ] {
                    map.remove(unsupported);
                }

                if let Some(serde_json::Value::Object(properties)) = map.get_mut("properties") {
                    for value in properties.values_mut() {
                        *value = Self::sanitize_schema(value.take());
                    }
                }

                if let Some(items) = map.get_mut("items") {
                    *items = Self::sanitize_schema(items.take());
                }

                serde_json::Value::Object(map)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(Self::sanitize_schema).collect())
            }
            other => other,
        }
    }

    fn convert_transcript(transcript: &[Message]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for msg in transcript {
            let role = match msg.role {
                Role::System => {
                    system_parts.push(GeminiPart::Text {
                        text: msg.text_content(),
                    });
                    continue;
                }
                Role::User => "user",
                Role::Model => "model",
            };

            let parts = msg
                .parts
                .iter()
                .map(|part| match part {
                    Part::Text(text) => GeminiPart::Text { text: text.clone() },
                    Part::ToolCall(call) => GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                        },
                    },
                    Part::ToolResponse(response) => GeminiPart::FunctionResponse {
                        function_response: GeminiFunctionResponse {
                            name: response.name.clone(),
                            response: response.response.clone(),
                        },
                    },
                })
                .collect();

            contents.push(GeminiContent {
                role: Some(role.to_string()),
                parts,
            });
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: system_parts,
            })
        };
        (system_instruction, contents)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(
        &self,
        transcript: &[Message],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<Message, LlmError> {
        let (system_instruction, contents) = Self::convert_transcript(transcript);

        let tools = if tools.is_empty() {
            None
        } else {
            Some(vec![GeminiTool {
                function_declarations: tools
                    .iter()
                    .map(|tool| {
                        log::debug!("🔧 Gemini tool: {} (sanitized schema)", tool.name);
                        GeminiFunctionDeclaration {
                            name: tool.name.clone(),
                            description: tool.description.clone(),
                            parameters: Self::sanitize_schema(tool.parameters.clone()),
                        }
                    })
                    .collect(),
            }])
        };

        let request = GeminiRequest {
            contents,
            system_instruction,
            generation_config: Some(GeminiGenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
            }),
            tools,
        };

        log::debug!(
            "📤 Sending Gemini request with {} messages and {} tools",
            request.contents.len(),
            request
                .tools
                .as_ref()
                .map(|t| t[0].function_declarations.len())
                .unwrap_or(0)
        );

        let response = self
            .client
            .post(self.generate_url())
            .query(&[("key", self.profile.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let response_data: GeminiResponse = response.json().await?;

        let content = response_data
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .ok_or(LlmError::EmptyResponse)?;

        let parts: Vec<Part> = content
            .parts
            .into_iter()
            .filter_map(|part| match part {
                GeminiPart::Text { text } if !text.is_empty() => Some(Part::Text(text)),
                GeminiPart::FunctionCall { function_call } => {
                    Some(Part::ToolCall(ToolCallRequest {
                        name: function_call.name,
                        // Zero-parameter calls may omit `args` or send null
                        arguments: if function_call.args.is_null() {
                            empty_args()
                        } else {
                            function_call.args
                        },
                    }))
                }
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(Message::new(Role::Model, parts))
    }
}
