use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{BuilderError, Result};

// ── Choice enums ──────────────────────────────────────────────────────

/// Which family of chatbot a session is generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Retrieval-augmented chatbot over documents.
    #[default]
    Rag,
    /// Tabular-data agent answering questions with SQL / dataframes.
    Sql,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rag => "rag",
            Self::Sql => "sql",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rag" => Ok(Self::Rag),
            "sql" => Ok(Self::Sql),
            _ => Err(format!("Invalid agent_type '{}'. Valid values: rag, sql", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Pdf,
    Csv,
    Excel,
    TextFile,
    Txt,
    Xls,
    Xlsx,
    Postgres,
    Mysql,
    Mongo,
    Sqlite,
}

impl SourceType {
    pub const ALL: [SourceType; 11] = [
        Self::Pdf,
        Self::Csv,
        Self::Excel,
        Self::TextFile,
        Self::Txt,
        Self::Xls,
        Self::Xlsx,
        Self::Postgres,
        Self::Mysql,
        Self::Mongo,
        Self::Sqlite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Excel => "excel",
            Self::TextFile => "text_file",
            Self::Txt => "txt",
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Mongo => "mongo",
            Self::Sqlite => "sqlite",
        }
    }

    /// Sources backed by an uploaded file.
    pub fn is_file_based(&self) -> bool {
        matches!(
            self,
            Self::Pdf | Self::Csv | Self::Excel | Self::TextFile | Self::Txt | Self::Xls | Self::Xlsx
        )
    }

    /// Sources backed by a database connection.
    pub fn is_database(&self) -> bool {
        matches!(self, Self::Postgres | Self::Mysql | Self::Mongo | Self::Sqlite)
    }

    /// Spreadsheet-like inputs that end up in a dataframe.
    pub fn is_tabular_file(&self) -> bool {
        matches!(self, Self::Csv | Self::Excel | Self::Txt | Self::Xls | Self::Xlsx)
    }

    /// Template variant used to render this source. Several user-facing
    /// choices share one template.
    pub fn template_variant(&self) -> &'static str {
        match self {
            Self::Xls | Self::Xlsx => "excel",
            Self::Txt => "csv",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid source_type '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Openai,
    SentenceTransformers,
}

impl EmbeddingBackend {
    /// Infer the backend from a model name: OpenAI model names either say
    /// so or follow the `text-embedding-*` family naming.
    pub fn infer(model_name: &str) -> Self {
        let lower = model_name.to_lowercase();
        if lower.contains("openai") || lower.starts_with("text-embedding") {
            Self::Openai
        } else {
            Self::SentenceTransformers
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::SentenceTransformers => "sentence_transformers",
        }
    }

    pub fn template_variant(&self) -> &'static str {
        match self {
            Self::Openai => "openai_embedding",
            Self::SentenceTransformers => "sentence_transformers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    Pinecone,
    Milvus,
    Qdrant,
    Faiss,
    Chromadb,
}

impl VectorStoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pinecone => "pinecone",
            Self::Milvus => "milvus",
            Self::Qdrant => "qdrant",
            Self::Faiss => "faiss",
            Self::Chromadb => "chromadb",
        }
    }

    /// Stores that can be configured with a local URL instead of cloud credentials.
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Pinecone)
    }
}

impl FromStr for VectorStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pinecone" => Ok(Self::Pinecone),
            "milvus" => Ok(Self::Milvus),
            "qdrant" => Ok(Self::Qdrant),
            "faiss" => Ok(Self::Faiss),
            "chromadb" => Ok(Self::Chromadb),
            _ => Err(format!("Invalid vector DB '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Openai,
    Groq,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Groq => "groq",
            Self::Gemini => "gemini",
        }
    }

    /// Chat-completions endpoint the generated app should call.
    pub fn default_api_url(&self) -> &'static str {
        match self {
            Self::Openai => "https://api.openai.com/v1/chat/completions",
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Self::Gemini => {
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
            }
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::Openai),
            "groq" => Ok(Self::Groq),
            "gemini" => Ok(Self::Gemini),
            _ => Err(format!("Unsupported provider '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiFramework {
    Streamlit,
    Gradio,
}

impl UiFramework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streamlit => "streamlit",
            Self::Gradio => "gradio",
        }
    }
}

impl fmt::Display for UiFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UiFramework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streamlit" => Ok(Self::Streamlit),
            "gradio" => Ok(Self::Gradio),
            _ => Err(format!("Invalid UI '{}'. Valid values: streamlit, gradio", s)),
        }
    }
}

// ── Per-concern sub-structures ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_or_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl SourceConfig {
    pub fn of_type(kind: SourceType) -> Self {
        Self {
            kind,
            uri: None,
            database: None,
            collection_or_table: None,
            scheme: None,
            host: None,
            port: None,
            user: None,
            password: None,
            dbname: None,
            table: None,
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(rename = "type")]
    pub kind: EmbeddingBackend,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(rename = "type")]
    pub kind: VectorStoreKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_metric: Option<String>,
}

impl VectorStoreConfig {
    pub fn of_kind(kind: VectorStoreKind) -> Self {
        Self {
            kind,
            api_key: None,
            environment: None,
            index_name: None,
            url: None,
            collection_name: None,
            dimensions: None,
            distance_metric: None,
        }
    }
}

/// LLM settings arrive over two calls (provider, then credentials), so every
/// field is optional until build time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LlmProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl LlmConfig {
    pub fn has_credentials(&self) -> bool {
        non_empty(self.api_key.as_deref()) && non_empty(self.model_name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(rename = "type")]
    pub kind: UiFramework,
}

// ── The whole session document ────────────────────────────────────────

/// Typed view over a stored session document. Every concern is optional so a
/// session can be built up across many out-of-order calls; keys this struct
/// does not know are kept in `extra` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store: Option<VectorStoreConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionConfig {
    /// Decode the typed view from a raw stored document.
    pub fn from_document(doc: &Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(doc.clone()))?)
    }

    /// Encode back to the raw document shape the store persists.
    pub fn to_document(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(BuilderError::InvalidInput(format!(
                "session config serialized to a non-object: {}",
                other
            ))),
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.agent_type.unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fill missing LLM fields from the flat `llm_provider` / `llm_key` /
    /// `llm_model` keys older clients write.
    pub fn merge_legacy_llm_keys(&mut self) {
        let legacy = |key: &str| {
            self.extra
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let provider = legacy("llm_provider");
        let key = legacy("llm_key");
        let model = legacy("llm_model");

        let llm = self.llm.get_or_insert_with(LlmConfig::default);
        if llm.kind.is_none()
            && let Some(p) = provider.as_deref().and_then(|p| p.parse().ok())
        {
            llm.kind = Some(p);
            llm.provider = provider.clone();
        }
        if !non_empty(llm.api_key.as_deref()) {
            llm.api_key = key;
        }
        if !non_empty(llm.model_name.as_deref()) {
            llm.model_name = model;
        }
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}
