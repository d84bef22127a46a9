use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};

use crate::llm::GenerationConfig;
use crate::mcp::ServerParameters;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
const ENV_PREFIX: &str = "MCP_SECURITY";

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct LlmProfile {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

// Low temperature keeps security analysis reproducible.
fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmProfile {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            endpoint: default_endpoint(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmProfile {
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            max_output_tokens: self.max_tokens,
        }
    }
}

/// Launch parameters for the tool provider.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct MCPServerConfig {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>, // Per-server environment variables
    #[serde(default = "default_endpoint_timeout_secs")]
    pub endpoint_timeout_secs: u64,
}

fn default_command() -> String {
    "mcp-security".to_string()
}

fn default_endpoint_timeout_secs() -> u64 {
    10
}

impl Default for MCPServerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            env: HashMap::new(),
            endpoint_timeout_secs: default_endpoint_timeout_secs(),
        }
    }
}

impl MCPServerConfig {
    pub fn parameters(&self) -> ServerParameters {
        ServerParameters {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
        }
    }

    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.endpoint_timeout_secs)
    }

    /// Expand environment variables in format ${env:VAR_NAME}
    fn expand_env_vars(&mut self) {
        self.command = expand_env_var_string(&self.command);
        self.args = self
            .args
            .iter()
            .map(|arg| expand_env_var_string(arg))
            .collect();
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_var_string(v)))
            .collect();
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct RoutingConfig {
    /// Name of the secondary target users address explicitly ("ask gemini to ...").
    #[serde(default = "default_routing_target")]
    pub target: String,
    /// Replaces the built-in rules. Each pattern needs a `request` capture group.
    #[serde(default)]
    pub patterns: Option<Vec<String>>,
}

fn default_routing_target() -> String {
    "gemini".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            target: default_routing_target(),
            patterns: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: LlmProfile,
    #[serde(default)]
    pub server: MCPServerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub prompts: crate::prompts::PromptConfig,
}

impl AppConfig {
    fn config_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mcp_security")
    }

    pub fn config_file_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration and resolve the model API key. A missing key is fatal.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.model.api_key =
            resolve_api_key(std::env::var(API_KEY_ENV).ok(), &config.model.api_key)?;
        Ok(config)
    }

    /// Layer the optional config file under `MCP_SECURITY__*` environment variables.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_file_path);

        let config = Config::builder()
            .add_source(File::from(config_path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut app: AppConfig = config.try_deserialize()?;
        app.server.expand_env_vars();
        Ok(app)
    }
}

/// Prefer the environment variable, fall back to the configured key.
pub fn resolve_api_key(from_env: Option<String>, configured: &str) -> Result<String, ConfigError> {
    from_env
        .filter(|key| !key.trim().is_empty())
        .or_else(|| Some(configured.to_string()).filter(|key| !key.trim().is_empty()))
        .ok_or_else(|| ConfigError::Message(format!("{API_KEY_ENV} is not set")))
}

static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{env:([^}]*)\}").expect("placeholder pattern is valid"));

/// Replace each `${env:NAME}` with the variable's value (empty when unset).
/// Substituted values are not expanded again.
fn expand_env_var_string(value: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(value, |caps: &Captures| std::env::var(&caps[1]).unwrap_or_default())
        .into_owned()
}
