//! Build orchestration.
//!
//! A session moves through `Unconfigured → PartiallyConfigured →
//! ReadyToBuild → Built`. A build:
//!
//! 1. loads the session, folds legacy flat LLM keys into `llm` and writes the
//!    merged object back;
//! 2. checks every required field and fails with the complete list of what
//!    is missing before anything is written;
//! 3. re-renders every configured section, assembles `llm.py` and composes
//!    the code-generation prompt;
//! 4. calls the [`CodeGenerator`];
//! 5. only then writes `requirements.txt`, `.env`, `config.json`, `main.py`
//!    and `build.json`.
//!
//! Anything failing after validation is logged with its cause chain and
//! surfaced as a single [`BuilderError::BuildFailed`]. A failed LLM call
//! leaves a previous build's artifacts untouched.

pub mod env_file;
pub mod requirements;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BuilderError, Result};
use crate::llm::CodeGenerator;
use crate::prompt::{self, PromptInputs};
use crate::render::{RenderOutcome, RenderedSection, Section};
use crate::session::{AgentKind, SessionConfig, SourceType, non_empty};
use crate::util::write_atomic;
use crate::workspace::{
    BUILD_METADATA_FILE, CONFIG_SNAPSHOT_FILE, ENV_FILE, MAIN_FILE, REQUIREMENTS_FILE, Workspace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Unconfigured,
    PartiallyConfigured,
    ReadyToBuild,
    Built,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::PartiallyConfigured => "partially_configured",
            Self::ReadyToBuild => "ready_to_build",
            Self::Built => "built",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStatus {
    pub state: BuildState,
    pub missing: Vec<String>,
}

/// Every required field that `config` lacks, in a stable order.
pub fn missing_fields(config: &SessionConfig) -> Vec<String> {
    let mut missing = Vec::new();
    let rag = config.kind() == AgentKind::Rag;

    match &config.source {
        None => missing.push("source".to_string()),
        Some(source) if source.kind.is_file_based() => {
            if !non_empty(config.source_file.as_deref()) {
                missing.push("source_file".to_string());
            }
        }
        Some(source) if source.kind == SourceType::Sqlite => {
            if !non_empty(source.db_path.as_deref()) {
                missing.push("source.db_path".to_string());
            }
        }
        Some(source) => {
            for (name, value) in [
                ("uri", &source.uri),
                ("database", &source.database),
                ("collection_or_table", &source.collection_or_table),
            ] {
                if !non_empty(value.as_deref()) {
                    missing.push(format!("source.{}", name));
                }
            }
        }
    }

    if rag {
        match &config.embedding {
            None => missing.push("embedding".to_string()),
            Some(e) if e.model_name.trim().is_empty() => {
                missing.push("embedding.model_name".to_string())
            }
            Some(_) => {}
        }
        if config.vector_store.is_none() {
            missing.push("vector_store".to_string());
        }
    }

    let llm = config.llm.clone().unwrap_or_default();
    if llm.kind.is_none() {
        missing.push("llm.type".to_string());
    }
    if !non_empty(llm.api_key.as_deref()) {
        missing.push("llm.api_key".to_string());
    }
    if !non_empty(llm.model_name.as_deref()) {
        missing.push("llm.model_name".to_string());
    }

    if config.ui.is_none() {
        missing.push("ui".to_string());
    }
    if !non_empty(config.system_prompt.as_deref()) {
        missing.push("system_prompt".to_string());
    }
    missing
}

/// Where a session stands, without changing anything on disk.
pub fn assess(ws: &Workspace, session_id: &str) -> Result<BuildStatus> {
    let doc = ws.store.get(session_id)?;
    let mut config = SessionConfig::from_document(&doc)?;
    config.merge_legacy_llm_keys();
    let missing = missing_fields(&config);

    let state = if doc.is_empty() {
        BuildState::Unconfigured
    } else if !missing.is_empty() {
        BuildState::PartiallyConfigured
    } else if ws.layout().file(session_id, MAIN_FILE)?.is_file()
        && ws.layout().file(session_id, BUILD_METADATA_FILE)?.is_file()
    {
        BuildState::Built
    } else {
        BuildState::ReadyToBuild
    };
    Ok(BuildStatus { state, missing })
}

/// Written to `build.json` after a successful build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub session_id: String,
    pub agent_type: AgentKind,
    pub built_at: DateTime<Utc>,
    pub model: String,
    pub prompt_chars: usize,
    pub artifact_bytes: usize,
    pub requirements: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub session_id: String,
    pub output_dir: PathBuf,
    pub metadata: BuildMetadata,
}

struct PreparedBuild {
    config: SessionConfig,
    prompt: String,
    requirements: Vec<String>,
    env: String,
    output_dir: PathBuf,
}

/// `err` and its causes, skipping any cause whose message is already part of
/// the text so far.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !chain.contains(&message) {
            chain.push_str(": ");
            chain.push_str(&message);
        }
        source = cause.source();
    }
    chain
}

/// Load, merge legacy keys, persist the merge and validate.
fn load_and_validate(ws: &Workspace, session_id: &str) -> Result<SessionConfig> {
    let doc = ws.store.get(session_id)?;
    if doc.is_empty() {
        return Err(BuilderError::NotFound(format!(
            "No session found for '{}'",
            session_id
        )));
    }
    let mut config = SessionConfig::from_document(&doc)?;
    config.merge_legacy_llm_keys();
    if let Some(llm) = &config.llm {
        ws.store.update_with(session_id, "llm", llm)?;
    }

    let missing = missing_fields(&config);
    if !missing.is_empty() {
        tracing::warn!(session_id, missing = ?missing, "build rejected");
        return Err(BuilderError::Validation { missing });
    }
    Ok(config)
}

fn rendered_text(sections: &[RenderedSection], section: Section) -> &str {
    sections
        .iter()
        .find(|s| s.section == section)
        .map(|s| s.text.trim_end())
        .unwrap_or_default()
}

fn prepare(ws: &Workspace, session_id: &str, config: SessionConfig) -> Result<PreparedBuild> {
    let output_dir = ws.layout().ensure_session_dir(session_id)?;

    let sections: Vec<RenderedSection> = ws
        .renderer
        .render_current(session_id, &config)?
        .into_iter()
        .filter_map(|outcome| match outcome {
            RenderOutcome::Rendered(section) => Some(section),
            RenderOutcome::Skipped { .. } => None,
        })
        .collect();

    // llm.py holds the model constants followed by the client logic.
    let llm_py = format!(
        "{}\n\n{}\n",
        rendered_text(&sections, Section::Models),
        rendered_text(&sections, Section::Llm)
    );
    write_atomic(&output_dir.join(Section::Llm.role_file()), llm_py)?;

    let skeleton = ws.renderer.templates().skeleton(config.kind())?;
    let prompt = prompt::compose(&PromptInputs {
        kind: config.kind(),
        sections: &sections,
        system_prompt: config.system_prompt.as_deref().unwrap_or_default(),
        skeleton: &skeleton,
        source: config.source.as_ref(),
    });

    Ok(PreparedBuild {
        requirements: requirements::compute(&config),
        env: env_file::render(&config),
        config,
        prompt,
        output_dir,
    })
}

fn finalize(prepared: &PreparedBuild, code: &str, metadata: &BuildMetadata) -> Result<()> {
    let dir = &prepared.output_dir;
    write_atomic(
        &dir.join(REQUIREMENTS_FILE),
        requirements::manifest(&prepared.requirements),
    )?;
    write_atomic(&dir.join(ENV_FILE), &prepared.env)?;
    write_atomic(
        &dir.join(CONFIG_SNAPSHOT_FILE),
        serde_json::to_string_pretty(&prepared.config.to_document()?)?,
    )?;
    write_atomic(&dir.join(MAIN_FILE), format!("{}\n", code.trim_end()))?;
    write_atomic(
        &dir.join(BUILD_METADATA_FILE),
        serde_json::to_string_pretty(metadata)?,
    )?;
    Ok(())
}

/// Runs builds against a workspace with a given code generator.
#[derive(Clone)]
pub struct BuildOrchestrator {
    workspace: Workspace,
    generator: Arc<dyn CodeGenerator>,
}

impl BuildOrchestrator {
    pub fn new(workspace: Workspace, generator: Arc<dyn CodeGenerator>) -> Self {
        Self {
            workspace,
            generator,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Build the session's agent. Validation and missing-session errors are
    /// returned as is; every later failure becomes `BuildFailed`.
    pub async fn build(&self, session_id: &str) -> Result<BuildOutput> {
        let id = session_id.to_string();
        let config = self
            .workspace
            .call(move |ws| load_and_validate(ws, &id))
            .await?;

        match self.run(session_id, config).await {
            Ok(output) => {
                tracing::info!(
                    session_id,
                    output_dir = %output.output_dir.display(),
                    artifact_bytes = output.metadata.artifact_bytes,
                    "agent built"
                );
                Ok(output)
            }
            Err(e) => {
                tracing::error!(session_id, error = %error_chain(&e), "build failed");
                Err(BuilderError::build_failed(e))
            }
        }
    }

    async fn run(&self, session_id: &str, config: SessionConfig) -> Result<BuildOutput> {
        let id = session_id.to_string();
        let prepared = self
            .workspace
            .call(move |ws| prepare(ws, &id, config))
            .await?;

        let code = self
            .generator
            .generate(prompt::SYSTEM_MESSAGE, &prepared.prompt)
            .await?;
        if code.trim().is_empty() {
            return Err(BuilderError::Upstream("LLM returned no code".into()));
        }

        let metadata = BuildMetadata {
            session_id: session_id.to_string(),
            agent_type: prepared.config.kind(),
            built_at: Utc::now(),
            model: self.generator.model().to_string(),
            prompt_chars: prepared.prompt.len(),
            artifact_bytes: code.len(),
            requirements: prepared.requirements.clone(),
        };

        let output_dir = prepared.output_dir.clone();
        let meta = metadata.clone();
        self.workspace
            .call(move |_| finalize(&prepared, &code, &meta))
            .await?;

        Ok(BuildOutput {
            session_id: session_id.to_string(),
            output_dir,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockGenerator;
    use crate::render::{SectionRenderer, TemplateLibrary};
    use crate::session::*;
    use crate::workspace::OutputLayout;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn workspace() -> (TempDir, Workspace) {
        let dir = tempdir().unwrap();
        let ws = Workspace::new(
            SessionStore::new(dir.path().join("sessions")),
            SectionRenderer::new(
                TemplateLibrary::embedded(),
                OutputLayout::new(dir.path().join("generated")),
            ),
        );
        (dir, ws)
    }

    fn configure_complete(ws: &Workspace, id: &str) {
        let s = &ws.store;
        s.update(id, "source", json!({"type": "csv"})).unwrap();
        s.update(id, "source_file", json!("data.csv")).unwrap();
        s.update(
            id,
            "embedding",
            json!({"type": "openai", "model_name": "text-embedding-ada-002"}),
        )
        .unwrap();
        s.update(id, "vector_store", json!({"type": "faiss"})).unwrap();
        s.update(
            id,
            "llm",
            json!({"type": "groq", "provider": "groq", "api_key": "gsk_test", "model_name": "llama-3.3-70b-versatile"}),
        )
        .unwrap();
        s.update(id, "ui", json!({"type": "streamlit"})).unwrap();
        s.update(id, "system_prompt", json!("Answer from the data only.")).unwrap();
    }

    #[test]
    fn missing_fields_lists_everything_for_source_only_session() {
        let cfg = SessionConfig {
            source: Some(SourceConfig::of_type(SourceType::Pdf)),
            ..Default::default()
        };
        let missing = missing_fields(&cfg);
        for field in [
            "source_file",
            "embedding",
            "vector_store",
            "llm.type",
            "llm.api_key",
            "llm.model_name",
            "ui",
            "system_prompt",
        ] {
            assert!(missing.contains(&field.to_string()), "missing {}", field);
        }
        assert!(!missing.contains(&"source".to_string()));
    }

    #[test]
    fn database_sources_need_connection_fields() {
        let mut source = SourceConfig::of_type(SourceType::Postgres);
        source.uri = Some("postgres://h/db".into());
        let cfg = SessionConfig {
            source: Some(source),
            ..Default::default()
        };
        let missing = missing_fields(&cfg);
        assert!(missing.contains(&"source.database".to_string()));
        assert!(missing.contains(&"source.collection_or_table".to_string()));
        assert!(!missing.contains(&"source.uri".to_string()));

        let cfg = SessionConfig {
            source: Some(SourceConfig::of_type(SourceType::Sqlite)),
            ..Default::default()
        };
        assert!(missing_fields(&cfg).contains(&"source.db_path".to_string()));
    }

    #[test]
    fn sql_agents_do_not_need_retrieval_sections() {
        let cfg = SessionConfig {
            agent_type: Some(AgentKind::Sql),
            ..Default::default()
        };
        let missing = missing_fields(&cfg);
        assert!(!missing.contains(&"embedding".to_string()));
        assert!(!missing.contains(&"vector_store".to_string()));
        assert!(missing.contains(&"source".to_string()));
    }

    #[tokio::test]
    async fn end_to_end_build_writes_artifacts() {
        let (_dir, ws) = workspace();
        configure_complete(&ws, "s1");
        let generator = Arc::new(MockGenerator::replying("```python\nprint('agent')\n```"));
        let orchestrator = BuildOrchestrator::new(ws.clone(), generator.clone());

        let out = orchestrator.build("s1").await.unwrap();
        let dir = &out.output_dir;

        assert!(dir.join("main.py").is_file());
        let reqs = std::fs::read_to_string(dir.join("requirements.txt")).unwrap();
        for pkg in ["streamlit", "faiss-cpu", "openai"] {
            assert!(reqs.lines().any(|l| l == pkg), "requirements missing {}", pkg);
        }
        let snapshot: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("config.json")).unwrap()).unwrap();
        assert_eq!(snapshot["source"]["type"], "csv");

        let env = std::fs::read_to_string(dir.join(".env")).unwrap();
        assert!(env.contains("LLM_API_KEY=gsk_test"));
        assert!(env.contains("FILE_PATH=data.csv"));

        let llm_py = std::fs::read_to_string(dir.join("llm.py")).unwrap();
        assert!(llm_py.contains("MODEL_NAME"));
        assert!(llm_py.contains("def ask_llm"));

        assert_eq!(generator.calls(), 1);
        let prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("Answer from the data only."));
        assert!(prompt.contains("CSV file at `data.csv`"));

        assert_eq!(assess(&ws, "s1").unwrap().state, BuildState::Built);
        assert_eq!(out.metadata.model, "mock-model");
    }

    #[tokio::test]
    async fn validation_failure_lists_all_fields_and_skips_llm() {
        let (_dir, ws) = workspace();
        ws.store.update("s1", "source", json!({"type": "pdf"})).unwrap();
        let generator = Arc::new(MockGenerator::replying("x"));
        let orchestrator = BuildOrchestrator::new(ws.clone(), generator.clone());

        match orchestrator.build("s1").await {
            Err(BuilderError::Validation { missing }) => {
                for field in ["embedding", "vector_store", "ui", "system_prompt", "llm.api_key"] {
                    assert!(missing.contains(&field.to_string()), "missing {}", field);
                }
            }
            other => panic!("Expected Validation, got {:?}", other.map(|o| o.session_id)),
        }
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (_dir, ws) = workspace();
        let orchestrator = BuildOrchestrator::new(ws, Arc::new(MockGenerator::replying("x")));
        assert!(matches!(
            orchestrator.build("ghost").await,
            Err(BuilderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn upstream_failure_keeps_previous_artifact() {
        let (_dir, ws) = workspace();
        configure_complete(&ws, "s1");

        let ok = BuildOrchestrator::new(ws.clone(), Arc::new(MockGenerator::replying("print('v1')")));
        let out = ok.build("s1").await.unwrap();
        let main = out.output_dir.join("main.py");
        assert_eq!(std::fs::read_to_string(&main).unwrap(), "print('v1')\n");

        let failing = BuildOrchestrator::new(ws.clone(), Arc::new(MockGenerator::failing("503 Service Unavailable")));
        match failing.build("s1").await {
            Err(BuilderError::BuildFailed { source }) => {
                assert!(matches!(*source, BuilderError::Upstream(_)));
                assert!(source.to_string().contains("503"));
            }
            other => panic!("Expected BuildFailed, got {:?}", other.map(|o| o.session_id)),
        }
        assert_eq!(std::fs::read_to_string(&main).unwrap(), "print('v1')\n");
    }

    #[tokio::test]
    async fn legacy_llm_keys_are_merged_and_written_back() {
        let (_dir, ws) = workspace();
        configure_complete(&ws, "s1");
        ws.store.update("s1", "llm", json!({})).unwrap();
        ws.store.update("s1", "llm_provider", json!("groq")).unwrap();
        ws.store.update("s1", "llm_key", json!("gsk_legacy")).unwrap();
        ws.store.update("s1", "llm_model", json!("llama-3.3-70b-versatile")).unwrap();

        let orchestrator = BuildOrchestrator::new(ws.clone(), Arc::new(MockGenerator::replying("print(1)")));
        orchestrator.build("s1").await.unwrap();

        let doc = ws.store.get("s1").unwrap();
        assert_eq!(doc["llm"]["type"], "groq");
        assert_eq!(doc["llm"]["api_key"], "gsk_legacy");
        assert_eq!(doc["llm"]["model_name"], "llama-3.3-70b-versatile");
    }

    #[test]
    fn assess_walks_the_state_machine() {
        let (_dir, ws) = workspace();
        assert_eq!(assess(&ws, "s1").unwrap().state, BuildState::Unconfigured);

        ws.store.update("s1", "ui", json!({"type": "gradio"})).unwrap();
        let status = assess(&ws, "s1").unwrap();
        assert_eq!(status.state, BuildState::PartiallyConfigured);
        assert!(!status.missing.is_empty());

        configure_complete(&ws, "s1");
        let status = assess(&ws, "s1").unwrap();
        assert_eq!(status.state, BuildState::ReadyToBuild);
        assert!(status.missing.is_empty());
    }

    #[test]
    fn error_chain_names_each_cause_once() {
        let err = BuilderError::build_failed(BuilderError::Upstream("timeout".into()));
        let chain = error_chain(&err);
        assert_eq!(chain, "Build failed: LLM request failed: timeout");
    }

    #[test]
    fn error_chain_reports_nested_io_cause_once() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = BuilderError::build_failed(BuilderError::io("/out/main.py", io));
        let chain = error_chain(&err);
        assert_eq!(chain.matches("denied").count(), 1, "{}", chain);
        assert!(chain.starts_with("Build failed: "));
    }
}
