//! Session store: one JSON document per session id.
//!
//! A session accumulates configuration across many independent form
//! submissions. The store is deliberately simple: `get` reads the whole
//! document (an absent file is an empty document), `update` performs a
//! read-modify-write of a single top-level key. Writes go through a temp file
//! and a rename so a crash never leaves a half-written document behind.
//!
//! The store itself does no locking. Callers that mutate a session hold the
//! per-session guard from [`SessionLocks`] for the whole read-modify-write.

pub mod models;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::OwnedMutexGuard;

use crate::errors::{BuilderError, Result};

pub use models::*;

/// Longest accepted session id.
const MAX_SESSION_ID_LEN: usize = 64;

/// Reject ids that could escape the data directories.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let ok = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(BuilderError::InvalidInput(format!(
            "Invalid session_id '{}'",
            session_id
        )))
    }
}

/// Keys whose string values are credentials.
const SECRET_KEYS: &[&str] = &["api_key", "llm_key", "password"];

/// Copy of a session document with credential values masked, for display.
pub fn redact_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if SECRET_KEYS.contains(&k.as_str()) && v.is_string() {
                        Value::String("***".into())
                    } else {
                        redact_secrets(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_secrets).collect()),
        other => other.clone(),
    }
}

/// File-backed key/value documents keyed by session id.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{}.json", session_id)))
    }

    pub fn exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.path_for(session_id)?.exists())
    }

    /// Read the whole document. Absent sessions read as an empty mapping;
    /// undecodable documents surface as `BuilderError::Json`.
    pub fn get(&self, session_id: &str) -> Result<Map<String, Value>> {
        let path = self.path_for(session_id)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(BuilderError::io(path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Typed view of the document.
    pub fn get_config(&self, session_id: &str) -> Result<SessionConfig> {
        SessionConfig::from_document(&self.get(session_id)?)
    }

    /// Set one top-level key, keeping every other key. Returns the document
    /// as written.
    pub fn update(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> Result<Map<String, Value>> {
        let mut doc = self.get(session_id)?;
        doc.insert(key.to_string(), value);
        self.put(session_id, &doc)?;
        tracing::debug!(session_id, key, "session key updated");
        Ok(doc)
    }

    /// Serialize `value` and store it under `key`.
    pub fn update_with<T: serde::Serialize>(
        &self,
        session_id: &str,
        key: &str,
        value: &T,
    ) -> Result<Map<String, Value>> {
        self.update(session_id, key, serde_json::to_value(value)?)
    }

    /// Replace the whole document.
    pub fn put(&self, session_id: &str, doc: &Map<String, Value>) -> Result<()> {
        let path = self.path_for(session_id)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| BuilderError::io(&self.dir, e))?;
        let bytes = serde_json::to_vec(doc)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| BuilderError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| BuilderError::io(&path, e))?;
        Ok(())
    }
}

/// Per-session async mutexes. Holding the guard serializes every mutating
/// operation on one session while other sessions proceed in parallel.
#[derive(Debug, Default, Clone)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody is holding or waiting on.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(
                map.entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Number of sessions currently locked or waited on.
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .map(|m| m.values().filter(|l| Arc::strong_count(l) > 1).count())
            .unwrap_or(0)
    }
}
