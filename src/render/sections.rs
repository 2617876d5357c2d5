use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::session::{AgentKind, SessionConfig};

/// A configurable concern of a generated agent. Each section owns one role
/// file in the output directory and one or more blocks in `all.py`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Source,
    Embedding,
    VectorStore,
    Llm,
    Models,
    Prompt,
    Ui,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Self::Source,
        Self::Embedding,
        Self::VectorStore,
        Self::Llm,
        Self::Models,
        Self::Prompt,
        Self::Ui,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Embedding => "embedding",
            Self::VectorStore => "vector_store",
            Self::Llm => "llm",
            Self::Models => "models",
            Self::Prompt => "prompt",
            Self::Ui => "ui",
        }
    }

    /// The per-role file this section's latest render is written to. `llm`
    /// and `models` share `llm.py`.
    pub fn role_file(&self) -> &'static str {
        match self {
            Self::Source => "source.py",
            Self::Embedding => "embedding_model.py",
            Self::VectorStore => "vector_db.py",
            Self::Llm | Self::Models => "llm.py",
            Self::Prompt => "system_prompt.py",
            Self::Ui => "ui.py",
        }
    }

    /// Sections that need LLM credentials before they can render.
    pub fn needs_llm_credentials(&self) -> bool {
        matches!(self, Self::Llm | Self::Models)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sec| sec.as_str() == s)
            .ok_or_else(|| format!("Unknown section '{}'", s))
    }
}

/// Sections that make up an agent of `kind`, in prompt order.
pub fn sections_for(kind: AgentKind) -> &'static [Section] {
    match kind {
        AgentKind::Rag => &Section::ALL,
        AgentKind::Sql => &[
            Section::Source,
            Section::Llm,
            Section::Models,
            Section::Prompt,
            Section::Ui,
        ],
    }
}

/// The variant `section` currently selects in `config`, if the section has
/// been configured at all.
pub fn current_variant(section: Section, config: &SessionConfig) -> Option<String> {
    match section {
        Section::Source => config
            .source
            .as_ref()
            .map(|s| s.kind.template_variant().to_string()),
        Section::Embedding => config
            .embedding
            .as_ref()
            .map(|e| e.kind.template_variant().to_string()),
        Section::VectorStore => config
            .vector_store
            .as_ref()
            .map(|v| v.kind.as_str().to_string()),
        Section::Llm => config
            .llm
            .as_ref()
            .and_then(|l| l.kind)
            .map(|k| k.as_str().to_string()),
        Section::Models => config
            .llm
            .as_ref()
            .and_then(|l| l.model_name.clone())
            .filter(|m| !m.trim().is_empty()),
        Section::Prompt => config.system_prompt.as_ref().map(|_| "default".to_string()),
        Section::Ui => config.ui.as_ref().map(|u| u.kind.as_str().to_string()),
    }
}

/// The key a block is stored under in the cumulative document.
pub fn block_key(section: Section, variant: &str) -> String {
    format!("{}/{}", section.as_str(), variant)
}
