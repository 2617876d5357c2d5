//! HTTP surface.
//!
//! Form-encoded endpoints accumulate a session's configuration and re-render
//! the affected sections; further endpoints build the agent, run its preview
//! and download the output directory. See [`api::api_router`] for the routes.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::llm::{ChatCompletionsClient, CodeGenerator};
use crate::render::{SectionRenderer, TemplateLibrary};
use crate::session::SessionStore;
use crate::workspace::{OutputLayout, Workspace};

pub use api::{ApiError, AppState, SharedState, api_router};

/// Build the full application router.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Workspace rooted at the configured storage directories.
pub fn workspace_from(config: &ServiceConfig) -> Workspace {
    let templates = match &config.storage.template_dir {
        Some(dir) => TemplateLibrary::with_override_dir(dir),
        None => TemplateLibrary::embedded(),
    };
    Workspace::new(
        SessionStore::new(&config.storage.session_dir),
        SectionRenderer::new(templates, OutputLayout::new(&config.storage.output_dir)),
    )
}

/// Start the builder service and serve until Ctrl-C.
pub async fn start_server(config: ServiceConfig) -> Result<()> {
    for dir in [&config.storage.session_dir, &config.storage.output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }

    let generator: Arc<dyn CodeGenerator> = Arc::new(
        ChatCompletionsClient::new(config.llm_settings())
            .context("Failed to initialize LLM client")?,
    );
    let state = Arc::new(AppState::new(
        workspace_from(&config),
        generator,
        config.preview_settings(),
    ));
    let app = build_router(Arc::clone(&state), config.server.dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        dev_mode = config.server.dev_mode,
        model = %config.llm.model,
        "agent builder listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.previews.shutdown().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
