//! Code-generation prompt composition.
//!
//! [`compose`] is a pure string assembly: the user's system prompt, a fixed
//! per-kind preamble, a description of the data source, the reference
//! skeleton verbatim and every rendered section labelled by its role. The
//! same inputs always produce byte-identical output.

use crate::render::RenderedSection;
use crate::session::{AgentKind, SourceConfig, SourceType};

/// System message sent alongside the composed prompt.
pub const SYSTEM_MESSAGE: &str =
    "You are a senior Python engineer. Output only valid Python code, no markdown, no explanations.";

/// Everything the composer needs. Borrowed so callers keep ownership.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub kind: AgentKind,
    pub sections: &'a [RenderedSection],
    pub system_prompt: &'a str,
    pub skeleton: &'a str,
    pub source: Option<&'a SourceConfig>,
}

/// Human-readable description of where the data comes from.
pub fn describe_source(source: Option<&SourceConfig>) -> String {
    let Some(source) = source else {
        return "a supported data source".to_string();
    };
    let location = |what: &str| match source.table.as_deref().or(source.collection_or_table.as_deref()) {
        Some(table) if !table.is_empty() => format!("{} `{}`", what, table),
        _ => what.to_string(),
    };
    match source.kind {
        SourceType::Pdf => "PDF file at `data.pdf`".to_string(),
        SourceType::Csv | SourceType::Txt => "CSV file at `data.csv`".to_string(),
        SourceType::Excel | SourceType::Xls | SourceType::Xlsx => "Excel file".to_string(),
        SourceType::TextFile => "plain text file".to_string(),
        SourceType::Mongo => location("MongoDB collection"),
        SourceType::Postgres => location("PostgreSQL table"),
        SourceType::Mysql => location("MySQL table"),
        SourceType::Sqlite => location("SQLite table"),
    }
}

fn role_label(section: &RenderedSection) -> String {
    format!(
        "# === {} ({}/{}) ===",
        section.section.role_file(),
        section.section.as_str(),
        section.variant
    )
}

fn preamble(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Rag => {
            "You are a senior Python developer building a Retrieval-Augmented Generation (RAG) chatbot.\n\
             \n\
             ### Objective\n\
             Generate a **single, runnable `main.py`** file for the application.\n\
             \n\
             ### Critical Requirements\n\
             - The entire RAG pipeline must exist **in one file** (`main.py`).\n\
             - Do not import the component files (no `from source import ...`).\n\
             - Inline all logic directly into `main.py` using the component code provided.\n\
             - Follow the provided reference structure.\n\
             - Avoid duplicated definitions.\n\
             - Output **pure Python only**: no markdown, no explanations."
        }
        AgentKind::Sql => {
            "You are a senior Python developer building a chatbot that answers questions about tabular data with SQL.\n\
             \n\
             ### Objective\n\
             Generate a **single, runnable `main.py`** file for the application.\n\
             \n\
             ### Critical Requirements\n\
             - The whole agent must exist **in one file** (`main.py`).\n\
             - Inline all logic directly into `main.py` using the component code provided.\n\
             - Follow the provided reference structure.\n\
             - Only ever run read-only queries.\n\
             - Output **pure Python only**: no markdown, no explanations."
        }
    }
}

/// Assemble the code-generation instruction.
pub fn compose(inputs: &PromptInputs<'_>) -> String {
    let components = inputs
        .sections
        .iter()
        .map(|s| format!("{}\n{}", role_label(s), s.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{system}\n\n{preamble}\n\n### Data Source\nUse: {source}\n\n### Reference Structure (main.py)\n{skeleton}\n\n### Component Logic (inline into main.py)\n{components}\n",
        system = inputs.system_prompt.trim(),
        preamble = preamble(inputs.kind),
        source = describe_source(inputs.source),
        skeleton = inputs.skeleton.trim_end(),
        components = components,
    )
}
