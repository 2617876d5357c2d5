use crate::session::{SessionConfig, SourceType};

fn quote(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '='));
    if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Environment variables the generated app reads at startup.
pub fn entries(config: &SessionConfig) -> Vec<(&'static str, String)> {
    let mut vars = Vec::new();
    let api_key = config
        .llm
        .as_ref()
        .and_then(|l| l.api_key.clone())
        .unwrap_or_default();
    vars.push(("LLM_API_KEY", api_key));

    let Some(source) = &config.source else {
        return vars;
    };
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    match source.kind {
        SourceType::Postgres | SourceType::Mysql => {
            vars.push(("DB_HOST", field(&source.host)));
            vars.push(("DB_NAME", field(&source.dbname)));
            vars.push(("DB_USER", field(&source.user)));
            vars.push(("DB_PASSWORD", field(&source.password)));
            vars.push((
                "DB_PORT",
                source.port.map(|p| p.to_string()).unwrap_or_default(),
            ));
        }
        SourceType::Sqlite => vars.push(("SQLITE_PATH", field(&source.db_path))),
        SourceType::Mongo => vars.push(("MONGO_URI", field(&source.uri))),
        _ => vars.push(("FILE_PATH", config.source_file.clone().unwrap_or_default())),
    }
    vars
}

/// `.env` file contents.
pub fn render(config: &SessionConfig) -> String {
    entries(config)
        .into_iter()
        .map(|(k, v)| format!("{}={}\n", k, quote(&v)))
        .collect()
}
