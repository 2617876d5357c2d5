//! Session inspection commands: `agent-builder session`.

use anyhow::{Context, Result};
use serde_json::Value;

use agent_builder::build;
use agent_builder::config::ServiceConfig;
use agent_builder::server::workspace_from;
use agent_builder::session::redact_secrets;

use super::super::SessionCommands;

pub fn cmd_session(config: &ServiceConfig, command: SessionCommands) -> Result<()> {
    let ws = workspace_from(config);

    match command {
        SessionCommands::Show { id } => {
            let doc = ws
                .store
                .get(&id)
                .with_context(|| format!("Failed to read session '{}'", id))?;
            let shown = redact_secrets(&Value::Object(doc));
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        SessionCommands::Status { id } => {
            let status = build::assess(&ws, &id)
                .with_context(|| format!("Failed to assess session '{}'", id))?;
            println!("Session: {}", id);
            println!("State:   {}", status.state);
            if !status.missing.is_empty() {
                println!("Missing:");
                for field in &status.missing {
                    println!("  - {}", field);
                }
            }
        }
    }

    Ok(())
}
