mod agentic;
mod config;
mod llm;
mod mcp;
mod prompts;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use agentic::{AgentError, AgentUpdate, Conversation, RoutingRules};
use config::AppConfig;
use llm::gemini::GeminiClient;
use mcp::{SharedTransport, ToolRegistry, WsMCPClient};
use prompts::PromptManager;

const EXIT_COMMANDS: &[&str] = &["quit", "exit", "q"];

/// Interactive security assistant backed by an MCP tool provider.
#[derive(Debug, Parser)]
#[command(name = "mcp_security", version, about)]
struct Cli {
    /// Configuration file (defaults to <data dir>/mcp_security/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tool provider executable, overrides `server.command`
    #[arg(long)]
    server_command: Option<String>,

    /// Tool provider argument, repeatable; overrides `server.args`
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_arg: Vec<String>,
}

pub fn tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tungstenite=warn,tokio_tungstenite=warn,hyper=warn"));

    // stdout is reserved for the conversation
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn is_exit_command(line: &str) -> bool {
    EXIT_COMMANDS.contains(&line.trim())
}

fn routing_rules(config: &AppConfig) -> Result<RoutingRules> {
    let rules = match &config.routing.patterns {
        Some(patterns) => RoutingRules::from_patterns(&config.routing.target, patterns),
        None => RoutingRules::for_target(&config.routing.target),
    };
    rules.context("Invalid routing configuration")
}

fn print_update(update: AgentUpdate) {
    match update {
        AgentUpdate::ToolStarted { name, params_json, .. } => {
            println!("🔧 {name} {params_json}");
        }
        AgentUpdate::ToolResult { name, .. } => {
            println!("✅ {name} finished");
        }
        AgentUpdate::ToolError { name, error, .. } => {
            println!("❌ {name} failed: {error}");
        }
        AgentUpdate::TurnStarted { .. } | AgentUpdate::ModelReply { .. } => {}
    }
}

/// Reads stdin on its own thread so a pending read never holds up shutdown.
fn spawn_input_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Run one turn, handing progress updates to `on_update` as they arrive.
/// Every update of the turn is delivered before this returns.
async fn drive_turn(
    conversation: &mut Conversation,
    agent_rx: &mut mpsc::UnboundedReceiver<AgentUpdate>,
    input: &str,
    mut on_update: impl FnMut(AgentUpdate),
) -> Result<(), AgentError> {
    let outcome = {
        let turn = conversation.process_message(input);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                outcome = &mut turn => break outcome.map(|_| ()),
                Some(update) = agent_rx.recv() => on_update(update),
            }
        }
    };
    while let Ok(update) = agent_rx.try_recv() {
        on_update(update);
    }
    outcome
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing();
    let cli = Cli::parse();

    info!("🚀 Starting mcp_security...");

    let mut app_config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(command) = cli.server_command {
        app_config.server.command = command;
    }
    if !cli.server_arg.is_empty() {
        app_config.server.args = cli.server_arg;
    }

    let routing = routing_rules(&app_config)?;
    let prompts = PromptManager::load_from_config(&app_config.prompts);
    let generation = app_config.model.generation_config();
    let llm_client = GeminiClient::new(app_config.model.clone()).context("Failed to create model client")?;

    let client = WsMCPClient::new(app_config.server.parameters())
        .with_endpoint_timeout(app_config.server.endpoint_timeout());
    let transport: SharedTransport = Arc::new(RwLock::new(client));

    transport
        .write()
        .await
        .connect()
        .await
        .with_context(|| format!("Failed to start tool provider '{}'", app_config.server.command))?;

    let mut registry = ToolRegistry::new(transport.clone());
    if let Err(e) = registry.discover().await {
        let _ = transport.write().await.disconnect().await;
        return Err(e).context("Tool discovery failed");
    }
    if registry.is_empty() {
        warn!("⚠️ Provider offers no tools");
    }
    info!("🔧 Discovered {} tools", registry.len());
    for descriptor in registry.descriptors() {
        println!("  • {}: {}", descriptor.name, descriptor.description);
    }

    let (agent_tx, mut agent_rx) = mpsc::unbounded_channel();
    let mut conversation = Conversation::new(
        Arc::new(llm_client),
        registry,
        routing,
        prompts.system_prompt(),
        generation,
    )
    .with_updates(agent_tx);

    println!("Type a request, or one of {} to leave.", EXIT_COMMANDS.join(", "));
    let mut input_rx = spawn_input_reader();
    loop {
        prompt();
        let line = tokio::select! {
            line = input_rx.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let line = match line {
            Some(Ok(line)) => line,
            None => break,
            Some(Err(e)) => {
                warn!("⚠️ Failed to read input: {}", e);
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit_command(input) {
            break;
        }

        let outcome = drive_turn(&mut conversation, &mut agent_rx, input, print_update).await;

        match outcome {
            Ok(()) => match conversation.last_model_text() {
                Some(text) => println!("{text}"),
                None => println!("(no text reply)"),
            },
            Err(e) => {
                error!("❌ Request failed: {}", e);
                println!("Error: {e}");
            }
        }
    }

    if let Err(e) = transport.write().await.disconnect().await {
        warn!("⚠️ Disconnect failed: {}", e);
    }
    info!("👋 Goodbye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{calls, text, ScriptedModel};
    use crate::llm::GenerationConfig;
    use crate::mcp::testing::FakeTransport;

    #[test]
    fn test_exit_commands() {
        for line in ["quit", "exit", "q", " q ", "exit\n"] {
            assert!(is_exit_command(line), "{line}");
        }
        for line in ["quit now", "scan 10.0.0.1", "", "qq", "Q", "EXIT", "Quit"] {
            assert!(!is_exit_command(line), "{line}");
        }
    }

    #[test]
    fn test_cli_server_overrides() {
        let cli = Cli::parse_from([
            "mcp_security",
            "--server-command",
            "python3",
            "--server-arg",
            "server.py",
            "--server-arg",
            "--verbose",
        ]);
        assert_eq!(cli.server_command.as_deref(), Some("python3"));
        assert_eq!(cli.server_arg, vec!["server.py", "--verbose"]);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_routing_rules_from_config() {
        let mut config = AppConfig::default();
        assert_eq!(routing_rules(&config).unwrap().rules().len(), 4);

        config.routing.patterns = Some(vec![r"^(?P<request>.*)$".to_string()]);
        assert_eq!(routing_rules(&config).unwrap().rules().len(), 1);

        config.routing.patterns = Some(vec![r"^gemini: (.*)$".to_string()]);
        assert!(routing_rules(&config).is_err());
    }

    #[tokio::test]
    async fn test_turn_progress_delivered_before_reply() {
        let (_, shared) = FakeTransport::with_tools(&["port_scan"]).shared();
        let mut registry = ToolRegistry::new(shared);
        registry.discover().await.unwrap();

        let (agent_tx, mut agent_rx) = mpsc::unbounded_channel();
        let mut conversation = Conversation::new(
            ScriptedModel::new(vec![calls(&["port_scan"]), text("Port 22 is open.")]),
            registry,
            RoutingRules::for_target("gemini").unwrap(),
            "You are a security assistant.",
            GenerationConfig::default(),
        )
        .with_updates(agent_tx);

        let mut updates = Vec::new();
        drive_turn(&mut conversation, &mut agent_rx, "scan 10.0.0.1", |u| updates.push(u))
            .await
            .unwrap();

        assert!(matches!(updates.first(), Some(AgentUpdate::TurnStarted { .. })));
        assert!(updates
            .iter()
            .any(|u| matches!(u, AgentUpdate::ToolResult { name, .. } if name == "port_scan")));
        assert!(matches!(updates.last(), Some(AgentUpdate::ModelReply { tool_calls: 0, .. })));
        assert!(agent_rx.try_recv().is_err());
        assert_eq!(conversation.last_model_text().as_deref(), Some("Port 22 is open."));
    }
}
