//! Service configuration.
//!
//! Settings are layered: `builder.toml` (optional) → environment → CLI
//! flags. Every section has defaults, so an empty or absent file yields a
//! working local setup.
//!
//! ```toml
//! [storage]
//! session_dir = "data/session_data"
//! output_dir = "data/generated_agents"
//!
//! [llm]
//! url = "https://api.groq.com/openai/v1/chat/completions"
//! model = "llama-3.3-70b-versatile"
//! api_key_env = "GROQ_API_KEY"
//! timeout_secs = 60
//!
//! [preview]
//! streamlit_port = 8501
//! gradio_port = 7860
//! readiness_delay_ms = 2000
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! dev_mode = false
//!
//! [logging]
//! format = "text"
//! dir = "logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::LlmSettings;
use crate::preview::PreviewSettings;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "builder.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// One JSON document per session.
    pub session_dir: PathBuf,
    /// One output directory per session.
    pub output_dir: PathBuf,
    /// Templates here shadow the embedded set.
    pub template_dir: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from("data/session_data"),
            output_dir: PathBuf::from("data/generated_agents"),
            template_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Resolved from `api_key_env`; never written back to a file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            timeout_secs: 60,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSection {
    pub streamlit_port: u16,
    pub gradio_port: u16,
    pub readiness_delay_ms: u64,
    pub streamlit_command: String,
    pub python_command: String,
}

impl Default for PreviewSection {
    fn default() -> Self {
        let defaults = PreviewSettings::default();
        Self {
            streamlit_port: defaults.streamlit_port,
            gradio_port: defaults.gradio_port,
            readiness_delay_ms: defaults.readiness_delay.as_millis() as u64,
            streamlit_command: defaults.streamlit_command,
            python_command: defaults.python_command,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for a local frontend dev server.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: text, json", s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    /// Daily-rotated log files are written here when set.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub storage: StorageSection,
    pub llm: LlmSection,
    pub preview: PreviewSection,
    pub server: ServerSection,
    pub logging: LoggingSection,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse builder.toml")
    }

    /// Load `path`, or defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve a config from an optional explicit path, then apply the
    /// process environment. An explicit path must exist.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(Path::new(DEFAULT_CONFIG_FILE))?,
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("AGENT_BUILDER_DATA_DIR") {
            let root = PathBuf::from(dir);
            self.storage.session_dir = root.join("session_data");
            self.storage.output_dir = root.join("generated_agents");
        }
        if let Some(url) = get("GROQ_URL") {
            self.llm.url = url;
        }
        if let Some(model) = get("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(port) = get("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        self.llm.api_key = get(&self.llm.api_key_env);
    }

    /// Return human-readable warnings; never fails.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.llm.api_key.is_none() {
            warnings.push(format!(
                "No LLM API key: set {} to enable builds",
                self.llm.api_key_env
            ));
        }
        if self.llm.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0: every build request will time out".to_string());
        }
        if !self.llm.url.starts_with("http://") && !self.llm.url.starts_with("https://") {
            warnings.push(format!("llm.url '{}' is not an http(s) URL", self.llm.url));
        }
        if self.preview.streamlit_port == self.preview.gradio_port {
            warnings.push(format!(
                "preview.streamlit_port and preview.gradio_port are both {}",
                self.preview.gradio_port
            ));
        }
        if let Some(dir) = &self.storage.template_dir
            && !dir.is_dir()
        {
            warnings.push(format!(
                "storage.template_dir {} does not exist; embedded templates only",
                dir.display()
            ));
        }
        warnings
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            url: self.llm.url.clone(),
            model: self.llm.model.clone(),
            api_key: self.llm.api_key.clone(),
            timeout: Duration::from_secs(self.llm.timeout_secs),
        }
    }

    pub fn preview_settings(&self) -> PreviewSettings {
        PreviewSettings {
            streamlit_port: self.preview.streamlit_port,
            gradio_port: self.preview.gradio_port,
            readiness_delay: Duration::from_millis(self.preview.readiness_delay_ms),
            streamlit_command: self.preview.streamlit_command.clone(),
            python_command: self.preview.python_command.clone(),
        }
    }

    /// TOML rendering of the effective settings (the API key is never included).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
