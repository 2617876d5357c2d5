//! `agent-builder templates`.

use agent_builder::config::ServiceConfig;
use agent_builder::server::workspace_from;

pub fn cmd_templates(config: &ServiceConfig) {
    let ws = workspace_from(config);
    let names = ws.renderer.templates().list();
    if names.is_empty() {
        println!("No templates found.");
        return;
    }
    for name in names {
        println!("{}", name);
    }
}
