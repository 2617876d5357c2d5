//! Shared utility functions for the agent builder.

use std::path::Path;

use url::Url;

use crate::errors::{BuilderError, Result};

/// Default port recorded when a database URI does not carry one.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Write `contents` to `path` via a sibling temp file and a rename, so
/// readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BuilderError::io(parent, e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, contents).map_err(|e| BuilderError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| BuilderError::io(path, e))?;
    Ok(())
}

/// Drop every line that opens or closes a markdown code fence.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Prefix `http://` unless the URL already names an http(s) scheme.
pub fn normalize_http_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// `prefix_` followed by eight random hex digits.
pub fn short_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..8])
}

/// Connection details pulled out of a database URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbLocation {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Raw path component, leading slash included.
    pub path: String,
}

impl DbLocation {
    /// Database name: the path without its leading slash.
    pub fn dbname(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}

/// Parse a database URI such as `postgres://u:p@host:5433/sales`.
pub fn parse_db_uri(uri: &str) -> Result<DbLocation> {
    let parsed = Url::parse(uri.trim())
        .map_err(|e| BuilderError::InvalidInput(format!("Invalid database URI '{}': {}", uri, e)))?;

    Ok(DbLocation {
        scheme: parsed.scheme().to_string(),
        host: parsed.host_str().unwrap_or_default().to_string(),
        port: parsed.port().unwrap_or(DEFAULT_DB_PORT),
        user: parsed.username().to_string(),
        password: parsed.password().unwrap_or_default().to_string(),
        path: parsed.path().to_string(),
    })
}
