//! `agent-builder serve`.

use anyhow::Result;

use agent_builder::config::ServiceConfig;

pub async fn cmd_serve(
    mut config: ServiceConfig,
    port: Option<u16>,
    host: Option<String>,
    dev: bool,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if dev {
        config.server.dev_mode = true;
    }

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    agent_builder::server::start_server(config).await
}
