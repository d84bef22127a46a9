use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Fixed operating instructions seeded at the top of every transcript.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a network security assistant with access to Nmap-based scanning tools \
exposed by a tool provider. When the user asks about hosts, ports, services, \
operating systems or vulnerabilities, call the most specific tool available \
instead of guessing, then summarise the findings: open ports, detected \
services and versions, likely vulnerabilities with CVE identifiers where the \
scan output names them, and concrete remediation steps. Only scan targets the \
user names explicitly. If a tool fails, say so plainly and suggest what the \
user could try next.";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PromptConfig {
    /// Replaces the built-in operating instructions when set.
    #[serde(default)]
    pub system_prompt_file: Option<String>,
}

#[derive(Clone)]
pub struct PromptManager {
    system_prompt: String,
}

impl PromptManager {
    pub fn load_from_config(config: &PromptConfig) -> Self {
        let system_prompt = match &config.system_prompt_file {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(content) if !content.trim().is_empty() => {
                    debug!("✅ Loaded system prompt from: {}", path);
                    content.trim().to_string()
                }
                Ok(_) => {
                    warn!("⚠️ System prompt file {} is empty, using built-in prompt", path);
                    DEFAULT_SYSTEM_PROMPT.to_string()
                }
                Err(e) => {
                    warn!("⚠️ Failed to load system prompt from {}: {}", path, e);
                    DEFAULT_SYSTEM_PROMPT.to_string()
                }
            },
            None => DEFAULT_SYSTEM_PROMPT.to_string(),
        };

        Self { system_prompt }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}
