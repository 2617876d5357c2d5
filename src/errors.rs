//! Typed error hierarchy for the agent builder.
//!
//! `BuilderError` covers every failure the session, render, build and
//! preview subsystems can surface. The HTTP layer maps each variant to a
//! status code in `server::api::ApiError`.

use thiserror::Error;

/// Errors from the builder pipeline.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// One or more required configuration fields are missing. Every missing
    /// field is listed, never just the first.
    #[error("Missing required configuration: {}", missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Template not found: {section}/{variant}")]
    TemplateNotFound { section: String, variant: String },

    #[error("Template {template} is malformed: {message}")]
    TemplateSyntax { template: String, message: String },

    #[error("LLM request failed: {0}")]
    Upstream(String),

    #[error("Preview process error: {0}")]
    Process(String),

    #[error("Build failed: {source}")]
    BuildFailed {
        #[source]
        source: Box<BuilderError>,
    },

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuilderError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap any error as the single user-facing build failure.
    pub fn build_failed(source: BuilderError) -> Self {
        match source {
            already @ BuilderError::BuildFailed { .. } => already,
            other => Self::BuildFailed {
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T, E = BuilderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_missing_field() {
        let err = BuilderError::Validation {
            missing: vec!["embedding".into(), "ui.type".into(), "llm.api_key".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("embedding"));
        assert!(msg.contains("ui.type"));
        assert!(msg.contains("llm.api_key"));
    }

    #[test]
    fn template_not_found_carries_section_and_variant() {
        let err = BuilderError::TemplateNotFound {
            section: "source".into(),
            variant: "parquet".into(),
        };
        match &err {
            BuilderError::TemplateNotFound { section, variant } => {
                assert_eq!(section, "source");
                assert_eq!(variant, "parquet");
            }
            _ => panic!("Expected TemplateNotFound"),
        }
        assert_eq!(err.to_string(), "Template not found: source/parquet");
    }

    #[test]
    fn io_error_carries_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = BuilderError::io("/data/session.json", io_err);
        match &err {
            BuilderError::Io { path, source } => {
                assert_eq!(path, &std::path::PathBuf::from("/data/session.json"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn build_failed_keeps_the_cause() {
        let err = BuilderError::build_failed(BuilderError::Upstream("429 Too Many Requests".into()));
        assert!(err.to_string().starts_with("Build failed"));
        let source = std::error::Error::source(&err).expect("cause");
        assert!(source.to_string().contains("429"));
    }

    #[test]
    fn build_failed_is_not_nested_twice() {
        let once = BuilderError::build_failed(BuilderError::Process("boom".into()));
        let twice = BuilderError::build_failed(once);
        match twice {
            BuilderError::BuildFailed { source } => {
                assert!(matches!(*source, BuilderError::Process(_)));
            }
            _ => panic!("Expected BuildFailed"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BuilderError::NotFound("x".into()));
        assert_std_error(&BuilderError::Validation { missing: vec![] });
    }
}
