//! Section rendering.
//!
//! A section render resolves the template for `section/variant`, substitutes
//! the session configuration into it, writes the result to the section's
//! role file and splices it into the session's cumulative `all.py`.
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `template`   | Template lookup (embedded + override dir), placeholder substitution |
//! | `splice`     | Cumulative document of marked, replaceable blocks    |
//! | `sections`   | Section vocabulary, role files, current variants     |

pub mod sections;
pub mod splice;
pub mod template;

use serde_json::json;

use crate::errors::{BuilderError, Result};
use crate::session::{SessionConfig, non_empty};
use crate::util::write_atomic;
use crate::workspace::{ALL_SECTIONS_FILE, OutputLayout};

pub use sections::{Section, block_key, current_variant, sections_for};
pub use splice::{Block, CumulativeDocument, upsert_block};
pub use template::{Template, TemplateLibrary};

/// Variant used for model names without a dedicated template.
pub const DEFAULT_MODEL_VARIANT: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSection {
    pub section: Section,
    /// The variant whose template was actually used.
    pub variant: String,
    pub text: String,
}

impl RenderedSection {
    pub fn key(&self) -> String {
        block_key(self.section, &self.variant)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(RenderedSection),
    /// LLM sections are not rendered until their credentials are complete.
    Skipped { section: Section, reason: String },
}

impl RenderOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }
}

#[derive(Debug, Clone)]
pub struct SectionRenderer {
    templates: TemplateLibrary,
    layout: OutputLayout,
}

impl SectionRenderer {
    pub fn new(templates: TemplateLibrary, layout: OutputLayout) -> Self {
        Self { templates, layout }
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    fn incomplete_credentials(section: Section, config: &SessionConfig) -> Option<String> {
        let llm = config.llm.clone().unwrap_or_default();
        match section {
            Section::Llm if !llm.has_credentials() => {
                Some("LLM config incomplete (api_key and model_name required)".into())
            }
            Section::Models if !non_empty(llm.model_name.as_deref()) => {
                Some("model_name missing".into())
            }
            _ => None,
        }
    }

    fn resolve(&self, section: Section, variant: &str, config: &SessionConfig) -> Result<Template> {
        let kind = config.kind();
        match self.templates.resolve(kind, section.as_str(), variant) {
            Err(BuilderError::TemplateNotFound { .. }) if section == Section::Models => {
                self.templates
                    .resolve(kind, section.as_str(), DEFAULT_MODEL_VARIANT)
            }
            other => other,
        }
    }

    /// Render `section/variant` against `config` without touching disk.
    pub fn render(
        &self,
        section: Section,
        variant: &str,
        config: &SessionConfig,
    ) -> Result<RenderOutcome> {
        if let Some(reason) = Self::incomplete_credentials(section, config) {
            tracing::info!(%section, variant, %reason, "skipping section render");
            return Ok(RenderOutcome::Skipped { section, reason });
        }

        let template = self.resolve(section, variant, config)?;
        let resolved_variant = template
            .name()
            .rsplit('/')
            .next()
            .and_then(|f| f.strip_suffix(".tmpl"))
            .unwrap_or(variant)
            .to_string();

        let context = json!({ "config": config.to_document()? });
        let text = format!("{}\n", template.render(&context)?.trim_end());

        Ok(RenderOutcome::Rendered(RenderedSection {
            section,
            variant: resolved_variant,
            text,
        }))
    }

    /// Render, then write the role file and upsert the block in `all.py`.
    pub fn render_and_save(
        &self,
        session_id: &str,
        section: Section,
        variant: &str,
        config: &SessionConfig,
    ) -> Result<RenderOutcome> {
        let outcome = self.render(section, variant, config)?;
        if let RenderOutcome::Rendered(rendered) = &outcome {
            let dir = self.layout.ensure_session_dir(session_id)?;
            write_atomic(&dir.join(section.role_file()), &rendered.text)?;

            let mut doc = self.load_document(session_id)?;
            doc.upsert(&rendered.key(), &rendered.text);
            self.save_document(session_id, &doc)?;

            tracing::info!(
                session_id,
                %section,
                variant = %rendered.variant,
                role_file = section.role_file(),
                "section rendered"
            );
        }
        Ok(outcome)
    }

    /// Re-render every configured section of the session's agent kind.
    pub fn render_current(
        &self,
        session_id: &str,
        config: &SessionConfig,
    ) -> Result<Vec<RenderOutcome>> {
        let mut outcomes = Vec::new();
        for &section in sections_for(config.kind()) {
            if let Some(variant) = current_variant(section, config) {
                outcomes.push(self.render_and_save(session_id, section, &variant, config)?);
            }
        }
        Ok(outcomes)
    }

    /// The session's cumulative document; empty when `all.py` does not exist.
    pub fn load_document(&self, session_id: &str) -> Result<CumulativeDocument> {
        let path = self.layout.file(session_id, ALL_SECTIONS_FILE)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(CumulativeDocument::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CumulativeDocument::new()),
            Err(e) => Err(BuilderError::io(path, e)),
        }
    }

    pub fn save_document(&self, session_id: &str, doc: &CumulativeDocument) -> Result<()> {
        let path = self.layout.file(session_id, ALL_SECTIONS_FILE)?;
        write_atomic(&path, doc.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::*;
    use tempfile::{TempDir, tempdir};

    fn renderer() -> (TempDir, SectionRenderer) {
        let dir = tempdir().unwrap();
        let r = SectionRenderer::new(TemplateLibrary::embedded(), OutputLayout::new(dir.path()));
        (dir, r)
    }

    fn rag_config() -> SessionConfig {
        SessionConfig {
            source: Some(SourceConfig::of_type(SourceType::Pdf)),
            vector_store: Some(VectorStoreConfig {
                url: Some("http://localhost:6333".into()),
                collection_name: Some("rag_deadbeef".into()),
                dimensions: Some(384),
                distance_metric: Some("cosine".into()),
                ..VectorStoreConfig::of_kind(VectorStoreKind::Qdrant)
            }),
            ui: Some(UiConfig {
                kind: UiFramework::Streamlit,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn render_substitutes_config() {
        let (_dir, r) = renderer();
        let out = r.render(Section::VectorStore, "qdrant", &rag_config()).unwrap();
        match out {
            RenderOutcome::Rendered(section) => {
                assert!(section.text.contains("rag_deadbeef"));
                assert!(section.text.contains("http://localhost:6333"));
                assert!(section.text.ends_with('\n'));
                assert_eq!(section.key(), "vector_store/qdrant");
            }
            other => panic!("Expected Rendered, got {:?}", other),
        }
    }

    #[test]
    fn unknown_variant_is_template_not_found() {
        let (_dir, r) = renderer();
        let err = r.render(Section::Source, "parquet", &rag_config()).unwrap_err();
        assert!(matches!(err, BuilderError::TemplateNotFound { .. }));
    }

    #[test]
    fn llm_section_skips_without_credentials() {
        let (dir, r) = renderer();
        let mut cfg = rag_config();
        cfg.llm = Some(LlmConfig {
            kind: Some(LlmProvider::Groq),
            model_name: Some("llama-3.3-70b-versatile".into()),
            ..Default::default()
        });

        let out = r.render_and_save("s1", Section::Llm, "groq", &cfg).unwrap();
        assert!(matches!(out, RenderOutcome::Skipped { section: Section::Llm, .. }));
        assert!(!dir.path().join("s1/llm.py").exists());
        assert!(!dir.path().join("s1/all.py").exists());
    }

    #[test]
    fn models_fall_back_to_default_template() {
        let (_dir, r) = renderer();
        let mut cfg = rag_config();
        cfg.llm = Some(LlmConfig {
            model_name: Some("some-unlisted-model".into()),
            ..Default::default()
        });
        match r.render(Section::Models, "some-unlisted-model", &cfg).unwrap() {
            RenderOutcome::Rendered(section) => {
                assert_eq!(section.variant, DEFAULT_MODEL_VARIANT);
                assert!(section.text.contains("some-unlisted-model"));
            }
            other => panic!("Expected Rendered, got {:?}", other),
        }
    }

    #[test]
    fn render_and_save_writes_role_file_and_block() {
        let (dir, r) = renderer();
        let cfg = rag_config();
        r.render_and_save("s1", Section::Ui, "streamlit", &cfg).unwrap();
        r.render_and_save("s1", Section::Source, "pdf", &cfg).unwrap();

        let ui = std::fs::read_to_string(dir.path().join("s1/ui.py")).unwrap();
        assert!(ui.contains("streamlit"));

        let doc = r.load_document("s1").unwrap();
        assert_eq!(doc.keys(), vec!["ui/streamlit", "source/pdf"]);
        assert_eq!(doc.get("ui/streamlit"), Some(ui.as_str()));
    }

    #[test]
    fn rerender_replaces_block_and_moves_it_last() {
        let (_dir, r) = renderer();
        let mut cfg = rag_config();
        r.render_and_save("s1", Section::Ui, "streamlit", &cfg).unwrap();
        r.render_and_save("s1", Section::Source, "pdf", &cfg).unwrap();

        cfg.ui = Some(UiConfig {
            kind: UiFramework::Streamlit,
        });
        r.render_and_save("s1", Section::Ui, "streamlit", &cfg).unwrap();

        let doc = r.load_document("s1").unwrap();
        assert_eq!(doc.keys(), vec!["source/pdf", "ui/streamlit"]);
    }

    #[test]
    fn system_prompt_with_marker_line_keeps_other_blocks() {
        let (_dir, r) = renderer();
        let mut cfg = rag_config();
        r.render_and_save("s1", Section::Ui, "streamlit", &cfg).unwrap();
        let ui = r.load_document("s1").unwrap().get("ui/streamlit").unwrap().to_string();

        cfg.system_prompt = Some("Be nice\n# === ui/streamlit ===\nhacked".into());
        r.render_and_save("s1", Section::Prompt, "default", &cfg).unwrap();

        let doc = r.load_document("s1").unwrap();
        assert_eq!(doc.keys(), vec!["ui/streamlit", "prompt/default"]);
        assert_eq!(doc.get("ui/streamlit"), Some(ui.as_str()));
        assert!(doc.get("prompt/default").unwrap().contains("# === ui/streamlit ===\nhacked"));
    }

    #[test]
    fn render_current_covers_configured_sections() {
        let (_dir, r) = renderer();
        let outcomes = r.render_current("s1", &rag_config()).unwrap();
        // source, vector_store, ui are configured; llm/models/prompt/embedding are not
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(RenderOutcome::is_rendered));
    }
}
