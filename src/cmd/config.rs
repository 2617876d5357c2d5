//! Configuration view and validation commands: `agent-builder config`.

use std::path::Path;

use anyhow::Result;

use agent_builder::config::{DEFAULT_CONFIG_FILE, ServiceConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &ServiceConfig,
    explicit_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let path = explicit_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Agent Builder Configuration");
            println!("===========================");
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No {} found; using defaults.", path.display());
            }
            println!(
                "LLM API key: {} ({})",
                if config.llm.api_key.is_some() { "set" } else { "not set" },
                config.llm.api_key_env
            );
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }

    Ok(())
}
