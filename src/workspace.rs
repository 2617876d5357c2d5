//! On-disk state shared by the HTTP handlers, the build and the CLI.
//!
//! [`OutputLayout`] names the files under each session's output directory.
//! [`Workspace`] bundles the session store with the section renderer and
//! runs filesystem work on the blocking pool.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::errors::{BuilderError, Result};
use crate::render::SectionRenderer;
use crate::session::{SessionStore, validate_session_id};

pub const ALL_SECTIONS_FILE: &str = "all.py";
pub const MAIN_FILE: &str = "main.py";
pub const CONFIG_SNAPSHOT_FILE: &str = "config.json";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const ENV_FILE: &str = ".env";
pub const BUILD_METADATA_FILE: &str = "build.json";
pub const PREVIEW_LOG_FILE: &str = "preview.log";

/// Where each session's generated files live: `<root>/<session_id>/`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    /// The session directory, created if missing.
    pub fn ensure_session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(session_id)?;
        std::fs::create_dir_all(&dir).map_err(|e| BuilderError::io(&dir, e))?;
        Ok(dir)
    }

    pub fn file(&self, session_id: &str, name: &str) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join(name))
    }
}

/// Session documents plus generated output, cheap to clone.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub store: SessionStore,
    pub renderer: SectionRenderer,
}

impl Workspace {
    pub fn new(store: SessionStore, renderer: SectionRenderer) -> Self {
        Self { store, renderer }
    }

    pub fn layout(&self) -> &OutputLayout {
        self.renderer.layout()
    }

    /// Run a closure against the workspace on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Workspace) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let ws = self.clone();
        tokio::task::spawn_blocking(move || f(&ws))
            .await
            .context("workspace task panicked")?
    }
}
