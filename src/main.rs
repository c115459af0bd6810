//! mcpbridge - call tools on remote MCP servers
//!
#![doc = "mcpbridge - call tools on remote MCP servers"]
#![doc = "Main entry point for the mcpbridge command-line tool."]

use anyhow::Result;
use colored::Colorize;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcpbridge::cli::{Cli, Commands};
use mcpbridge::commands;
use mcpbridge::config::Config;
use mcpbridge::error::{Severity, ToolCallError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose, cli.json_logs);

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<ToolCallError>() {
            Some(tool_err) => {
                let tag = match tool_err.severity {
                    Severity::Retryable => "retryable".yellow(),
                    Severity::Fatal => "fatal".red(),
                };
                eprintln!("{} [{}]: {}", "error".red().bold(), tag, tool_err.message);
            }
            None => eprintln!("{}: {:#}", "error".red().bold(), e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let conversation_id = cli
        .conversation
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::debug!("Using conversation id: {}", conversation_id);

    match cli.command {
        Commands::Servers => {
            commands::mcp::list_servers(&config);
            Ok(())
        }
        Commands::ListTools { server } => {
            tracing::info!("Listing tools on {}", server);
            commands::mcp::list_tools(&config, &conversation_id, &server).await
        }
        Commands::Call { server, tool, args } => {
            tracing::info!("Calling tool {} on {}", tool, server);
            commands::mcp::call_tool(&config, &conversation_id, &server, &tool, &args).await
        }
    }
}

fn init_tracing(verbose: bool, json_logs: bool) {
    let default_level = if verbose { "mcpbridge=debug" } else { "mcpbridge=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
