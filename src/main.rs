use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use agent_builder::config::ServiceConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "agent-builder")]
#[command(version, about = "Configure, generate and preview small AI chatbot apps")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the service config file (defaults to ./builder.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Port to serve on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (CORS permissive for a local frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Inspect stored sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// List every available section template
    Templates,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SessionCommands {
    /// Print a session's stored configuration (credentials masked)
    Show { id: String },
    /// Print a session's build state and any missing fields
    Status { id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; its variables are optional overrides.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = ServiceConfig::resolve(cli.config.as_deref())?;
    let _log_guard = agent_builder::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { port, host, dev } => {
            cmd::cmd_serve(config, *port, host.clone(), *dev).await?;
        }
        Commands::Session { command } => cmd::cmd_session(&config, command.clone())?,
        Commands::Templates => cmd::cmd_templates(&config),
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
