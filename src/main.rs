// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Toolbridge entry point - server management, tool listing and chat.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio::sync::mpsc;

use toolbridge::chat::{summarize_title, ChatFrame, ChatPipeline, ChatRequest};
use toolbridge::config::{self, CliOptions, ResolvedConfig};
use toolbridge::mcp::{tools_for_active_sessions, McpConfig, McpService, ServerConfig, Supervisor};
use toolbridge::providers::create_provider_from_config;
use toolbridge::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};
use toolbridge::tools::ToolRegistry;
use toolbridge::types::SharedProvider;
use toolbridge::VERSION;

/// Toolbridge - streaming chat with MCP tool servers.
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(author, version, about = "Streaming chat with MCP tool servers", long_about = None)]
struct Cli {
    /// Model to use
    #[arg(short, long, env = "TOOLBRIDGE_MODEL")]
    model: Option<String>,

    /// Base URL for the Gemini API
    #[arg(long, env = "TOOLBRIDGE_BASE_URL")]
    base_url: Option<String>,

    /// Extra connection attempts per server
    #[arg(long)]
    retries: Option<u32>,

    /// Skip the SSE endpoint probe
    #[arg(long)]
    no_preflight: bool,

    /// Read server records from this file instead of the config
    #[arg(long = "config", value_name = "FILE", global = true)]
    servers_file: Option<PathBuf>,

    /// Print collected metrics to stderr on exit
    #[arg(long, global = true)]
    metrics: bool,

    /// Show debug output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for listings.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect every enabled server and report the result
    Servers {
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// List the tools exposed by the connected servers
    Tools {
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Send one message and stream the framed response to stdout
    Chat {
        #[arg(short = 'P', long)]
        prompt: String,

        /// Attach tools from the connected servers
        #[arg(short, long)]
        tools: bool,

        /// JSON file with prior `{role, content}` turns
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Summarize a conversation opening into a short title
    Title {
        message: String,

        /// First assistant reply
        #[arg(short, long)]
        reply: Option<String>,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.verbose {
        TelemetryConfig::verbose()
    } else {
        TelemetryConfig::default()
    };
    let _guard = init_telemetry(&telemetry)?;

    let cli_options = CliOptions {
        model: cli.model.clone(),
        base_url: cli.base_url.clone(),
        enable_tools: None,
        retries: cli.retries,
        preflight: cli.no_preflight.then_some(false),
    };
    let workspace_root = std::env::current_dir()?;
    let mut config = config::load_config(&workspace_root, cli_options)?;
    if let Some(path) = &cli.servers_file {
        config.servers = McpConfig::load_from_file(path)?.servers;
    }

    let result = handle_command(cli.command, &config).await;

    if cli.metrics {
        eprintln!("{}", GLOBAL_METRICS.snapshot().format_report().dimmed());
    }
    result
}

async fn handle_command(command: Commands, config: &ResolvedConfig) -> anyhow::Result<()> {
    match command {
        Commands::Servers { format } => handle_servers(config, format).await,
        Commands::Tools { format } => handle_tools(config, format).await,
        Commands::Chat { prompt, tools, history } => {
            handle_chat(config, prompt, tools || config.enable_tools, history).await
        }
        Commands::Title { message, reply } => {
            let provider = create_provider_from_config(config)?;
            let title = summarize_title(provider.as_ref(), &message, reply.as_deref()).await?;
            println!("{}", title);
            Ok(())
        }
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                println!("{}", serde_json::to_string_pretty(config)?);
                Ok(())
            }
        },
        Commands::Version => {
            println!("toolbridge {}", VERSION);
            Ok(())
        }
    }
}

fn new_service(config: &ResolvedConfig) -> McpService {
    McpService::new(Arc::new(Supervisor::new(config.supervisor.options())))
}

async fn handle_servers(config: &ResolvedConfig, format: OutputFormat) -> anyhow::Result<()> {
    let service = new_service(config);
    let report = service.init_many(&config.servers).await;
    let views = service.list().await;

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "initMany": report, "servers": views });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if config.servers.is_empty() {
                println!("{}", "No servers configured".dimmed());
            }
            for session in service.supervisor().list().await {
                println!(
                    "{} {} [{}] - {} tools",
                    "✓".green(),
                    session.name().bright_white(),
                    session.id(),
                    session.tools().len()
                );
                if let Some(warning) = session.probe_warning() {
                    println!("    {}", warning.yellow());
                }
            }
            for failed in &report.failed {
                println!("{} {} [{}]", "✗".red(), failed.name.bright_white(), failed.id);
                if let Some(entry) = server_summary(&config.servers, &failed.id) {
                    println!("    {}", entry.dimmed());
                }
                println!("    {}", failed.error.red());
            }
        }
    }

    service.supervisor().shutdown().await;
    Ok(())
}

fn server_summary(servers: &[ServerConfig], id: &str) -> Option<String> {
    let config = servers.iter().find(|s| s.id == id)?;
    Some(format!("{} {}", config.transport_type(), config.url().or(config.command()).unwrap_or("")))
}

async fn handle_tools(config: &ResolvedConfig, format: OutputFormat) -> anyhow::Result<()> {
    let service = new_service(config);
    let report = service.init_many(&config.servers).await;
    for failed in &report.failed {
        eprintln!("{} {}: {}", "✗".red(), failed.id, failed.error);
    }

    let registry = ToolRegistry::from_handlers(tools_for_active_sessions(service.supervisor()).await);
    let definitions = registry.definitions();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&definitions)?),
        OutputFormat::Text => {
            if definitions.is_empty() {
                println!("{}", "No tools available".dimmed());
            }
            for def in &definitions {
                println!("{} - {}", def.name.bright_cyan(), def.description);
            }
        }
    }

    service.supervisor().shutdown().await;
    Ok(())
}

async fn handle_chat(
    config: &ResolvedConfig,
    message: String,
    enable_tools: bool,
    history: Option<PathBuf>,
) -> anyhow::Result<()> {
    let provider: SharedProvider = Arc::from(create_provider_from_config(config)?);
    let service = new_service(config);
    if enable_tools {
        let report = service.init_many(&config.servers).await;
        for failed in &report.failed {
            eprintln!("{} {}: {}", "✗".red(), failed.id, failed.error);
        }
    }

    let history = match history {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(&path)?)?,
        None => Vec::new(),
    };
    let request = ChatRequest::new(message).with_history(history).with_tools(enable_tools);

    let mut pipeline = ChatPipeline::new(provider, service.supervisor().clone());
    if let Some(prompt) = &config.system_prompt {
        pipeline = pipeline.with_system_prompt(prompt);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<ChatFrame>();
    let writer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(frame) = rx.recv().await {
            let _ = stdout.write_all(frame.encode().as_bytes());
            let _ = stdout.flush();
        }
    });

    let result = pipeline.run(&request, tx, None).await;
    // The pipeline's sender is gone once `run` returns.
    let _ = writer.await;
    service.supervisor().shutdown().await;

    let outcome = result?;
    if outcome.tool_rounds > 0 {
        eprintln!(
            "{}",
            format!(
                "{} tool calls over {} rounds",
                outcome.function_calls.len(),
                outcome.tool_rounds
            )
            .dimmed()
        );
    }
    Ok(())
}
