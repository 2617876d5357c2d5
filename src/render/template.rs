//! Section templates and placeholder substitution.
//!
//! Templates ship inside the binary (`templates/` at the crate root) and may
//! be shadowed by files in an override directory. A template is addressed by
//! agent kind, section and variant: `<kind>/<section>/<variant>.tmpl`, with
//! `common/<section>/<variant>.tmpl` shared by every kind.
//!
//! Placeholders have the form `{{ config.path.to.value | filter | ... }}`.
//! Supported filters are `upper`, `lower`, `json` and `default('text')`.
//! A path that does not resolve renders as the empty string.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rust_embed::RustEmbed;
use serde_json::Value;

use crate::errors::{BuilderError, Result};
use crate::session::AgentKind;

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/templates/"]
struct EmbeddedTemplates;

const TEMPLATE_EXT: &str = "tmpl";
const SHARED_NAMESPACE: &str = "common";

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").unwrap());

static PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*(\.\w+)*$").unwrap());

static DEFAULT_FILTER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^default\(\s*(?:'([^']*)'|"([^"]*)")\s*\)$"#).unwrap()
});

static VARIANT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-\.]+$").unwrap());

/// A loaded template, ready to render.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitute every placeholder from `context`.
    pub fn render(&self, context: &Value) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        let mut last = 0;
        for caps in PLACEHOLDER_REGEX.captures_iter(&self.source) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&self.source[last..whole.start()]);
            out.push_str(&self.eval(inner.as_str(), context)?);
            last = whole.end();
        }
        out.push_str(&self.source[last..]);
        Ok(out)
    }

    fn eval(&self, expr: &str, context: &Value) -> Result<String> {
        let mut parts = expr.split('|').map(str::trim);
        let path = parts.next().unwrap_or_default();
        if !PATH_REGEX.is_match(path) {
            return Err(self.syntax_error(format!("invalid placeholder '{}'", expr.trim())));
        }

        let mut value = lookup(context, path).cloned().unwrap_or(Value::Null);
        for filter in parts {
            value = self.apply_filter(filter, value)?;
        }
        Ok(to_text(&value))
    }

    fn apply_filter(&self, filter: &str, value: Value) -> Result<Value> {
        match filter {
            "upper" => Ok(Value::String(to_text(&value).to_uppercase())),
            "lower" => Ok(Value::String(to_text(&value).to_lowercase())),
            "json" => Ok(Value::String(serde_json::to_string(&value)?)),
            other => {
                let Some(caps) = DEFAULT_FILTER_REGEX.captures(other) else {
                    return Err(self.syntax_error(format!("unknown filter '{}'", other)));
                };
                if is_blank(&value) {
                    let fallback = caps
                        .get(1)
                        .or_else(|| caps.get(2))
                        .map(|m| m.as_str())
                        .unwrap_or_default();
                    Ok(Value::String(fallback.to_string()))
                } else {
                    Ok(value)
                }
            }
        }
    }

    fn syntax_error(&self, message: String) -> BuilderError {
        BuilderError::TemplateSyntax {
            template: self.name.clone(),
            message,
        }
    }
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Text form of a value as it should appear in generated Python source.
fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Resolves templates from the embedded set, optionally shadowed by a
/// directory on disk.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    override_dir: Option<PathBuf>,
}

impl TemplateLibrary {
    /// Only the templates compiled into the binary.
    pub fn embedded() -> Self {
        Self::default()
    }

    /// Files under `dir` take precedence over the embedded templates.
    pub fn with_override_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: Some(dir.into()),
        }
    }

    pub fn override_dir(&self) -> Option<&Path> {
        self.override_dir.as_deref()
    }

    fn read(&self, relative: &str) -> Result<Option<String>> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(relative);
            if path.is_file() {
                let text = std::fs::read_to_string(&path).map_err(|e| BuilderError::io(&path, e))?;
                return Ok(Some(text));
            }
        }
        match EmbeddedTemplates::get(relative) {
            Some(file) => {
                let text = String::from_utf8(file.data.into_owned()).map_err(|_| {
                    BuilderError::TemplateSyntax {
                        template: relative.to_string(),
                        message: "template is not valid UTF-8".into(),
                    }
                })?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Find the template for `kind`/`section`/`variant`, falling back to the
    /// shared namespace.
    pub fn resolve(&self, kind: AgentKind, section: &str, variant: &str) -> Result<Template> {
        let not_found = || BuilderError::TemplateNotFound {
            section: section.to_string(),
            variant: variant.to_string(),
        };
        if !VARIANT_REGEX.is_match(variant) || variant.contains("..") {
            return Err(not_found());
        }

        for namespace in [kind.as_str(), SHARED_NAMESPACE] {
            let relative = format!("{}/{}/{}.{}", namespace, section, variant, TEMPLATE_EXT);
            if let Some(source) = self.read(&relative)? {
                return Ok(Template::new(relative, source));
            }
        }
        Err(not_found())
    }

    pub fn exists(&self, kind: AgentKind, section: &str, variant: &str) -> bool {
        self.resolve(kind, section, variant).is_ok()
    }

    /// The reference structure the final program should follow. Returned
    /// verbatim, never rendered.
    pub fn skeleton(&self, kind: AgentKind) -> Result<String> {
        let relative = format!("{}/combined/main.{}", kind.as_str(), TEMPLATE_EXT);
        self.read(&relative)?.ok_or_else(|| BuilderError::TemplateNotFound {
            section: "combined".into(),
            variant: "main".into(),
        })
    }

    /// Every embedded template, as `namespace/section/variant`.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = EmbeddedTemplates::iter()
            .filter_map(|name: Cow<'static, str>| {
                name.strip_suffix(&format!(".{}", TEMPLATE_EXT))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }
}
