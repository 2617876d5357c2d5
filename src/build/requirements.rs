use std::collections::BTreeSet;

use crate::session::{
    AgentKind, EmbeddingBackend, LlmProvider, SessionConfig, SourceType, UiFramework,
    VectorStoreKind,
};

/// Always installed.
const BASE: &[&str] = &["python-dotenv", "requests"];

fn for_source(kind: SourceType) -> &'static [&'static str] {
    match kind {
        SourceType::Pdf => &["PyMuPDF"],
        SourceType::Csv
        | SourceType::Excel
        | SourceType::Txt
        | SourceType::Xls
        | SourceType::Xlsx => &["pandas", "openpyxl"],
        SourceType::Mongo => &["pymongo"],
        SourceType::Postgres => &["psycopg2-binary"],
        SourceType::Mysql => &["mysql-connector-python"],
        SourceType::TextFile | SourceType::Sqlite => &[],
    }
}

fn for_embedding(kind: EmbeddingBackend) -> &'static [&'static str] {
    match kind {
        EmbeddingBackend::SentenceTransformers => &["sentence-transformers"],
        EmbeddingBackend::Openai => &["openai"],
    }
}

fn for_vector_store(kind: VectorStoreKind) -> &'static [&'static str] {
    match kind {
        VectorStoreKind::Pinecone => &["pinecone-client"],
        VectorStoreKind::Faiss => &["faiss-cpu", "numpy"],
        VectorStoreKind::Qdrant => &["qdrant-client"],
        VectorStoreKind::Milvus => &["pymilvus"],
        VectorStoreKind::Chromadb => &["chromadb"],
    }
}

fn for_llm(provider: LlmProvider) -> &'static [&'static str] {
    match provider {
        LlmProvider::Openai => &["openai"],
        LlmProvider::Groq => &["groq"],
        LlmProvider::Gemini => &["google-generativeai"],
    }
}

fn for_ui(ui: UiFramework) -> &'static [&'static str] {
    match ui {
        UiFramework::Streamlit => &["streamlit"],
        UiFramework::Gradio => &["gradio"],
    }
}

/// Minimal package set for the generated app. Each configured concern
/// contributes its packages independently; the result is sorted and
/// de-duplicated.
pub fn compute(config: &SessionConfig) -> Vec<String> {
    let mut pkgs: BTreeSet<&'static str> = BASE.iter().copied().collect();

    if let Some(ui) = &config.ui {
        pkgs.extend(for_ui(ui.kind));
    }
    if let Some(source) = &config.source {
        pkgs.extend(for_source(source.kind));
    }
    if config.kind() == AgentKind::Rag {
        if let Some(embedding) = &config.embedding {
            pkgs.extend(for_embedding(embedding.kind));
        }
        if let Some(store) = &config.vector_store {
            pkgs.extend(for_vector_store(store.kind));
        }
    } else {
        pkgs.insert("pandas");
    }
    if let Some(provider) = config.llm.as_ref().and_then(|l| l.kind) {
        pkgs.extend(for_llm(provider));
    }

    pkgs.into_iter().map(str::to_string).collect()
}

/// `requirements.txt` contents: one package per line.
pub fn manifest(packages: &[String]) -> String {
    let mut out = packages.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::*;

    #[test]
    fn base_packages_are_always_present() {
        let pkgs = compute(&SessionConfig::default());
        assert_eq!(pkgs, vec!["python-dotenv", "requests"]);
    }

    #[test]
    fn each_concern_contributes_independently() {
        let cfg = SessionConfig {
            source: Some(SourceConfig::of_type(SourceType::Csv)),
            embedding: Some(EmbeddingConfig {
                kind: EmbeddingBackend::Openai,
                model_name: "text-embedding-ada-002".into(),
                dimensions: None,
            }),
            vector_store: Some(VectorStoreConfig::of_kind(VectorStoreKind::Faiss)),
            llm: Some(LlmConfig {
                kind: Some(LlmProvider::Groq),
                ..Default::default()
            }),
            ui: Some(UiConfig {
                kind: UiFramework::Streamlit,
            }),
            ..Default::default()
        };
        let pkgs = compute(&cfg);
        for expected in ["streamlit", "faiss-cpu", "numpy", "openai", "pandas", "openpyxl", "groq"] {
            assert!(pkgs.contains(&expected.to_string()), "missing {}", expected);
        }
        assert!(!pkgs.contains(&"gradio".to_string()));

        let mut sorted = pkgs.clone();
        sorted.sort();
        assert_eq!(pkgs, sorted);
    }

    #[test]
    fn sql_agents_ignore_retrieval_choices_and_add_pandas() {
        let cfg = SessionConfig {
            agent_type: Some(AgentKind::Sql),
            source: Some(SourceConfig::of_type(SourceType::Sqlite)),
            vector_store: Some(VectorStoreConfig::of_kind(VectorStoreKind::Pinecone)),
            ..Default::default()
        };
        let pkgs = compute(&cfg);
        assert!(pkgs.contains(&"pandas".to_string()));
        assert!(!pkgs.contains(&"pinecone-client".to_string()));
    }

    #[test]
    fn manifest_is_newline_terminated() {
        let text = manifest(&["a".to_string(), "b".to_string()]);
        assert_eq!(text, "a\nb\n");
    }
}
