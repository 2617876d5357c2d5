use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::archive;
use crate::build::{self, BuildOrchestrator};
use crate::errors::{BuilderError, Result};
use crate::llm::CodeGenerator;
use crate::preview::{PreviewRegistry, PreviewSettings};
use crate::render::{RenderOutcome, Section};
use crate::session::{
    AgentKind, EmbeddingBackend, EmbeddingConfig, LlmProvider, SessionLocks, SourceConfig,
    SourceType, UiConfig, UiFramework, VectorStoreConfig, VectorStoreKind, redact_secrets,
    validate_session_id,
};
use crate::util::{normalize_http_url, parse_db_uri, short_id};
use crate::workspace::{MAIN_FILE, Workspace};

/// Uploaded data files may be much larger than axum's default body limit.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub workspace: Workspace,
    pub locks: SessionLocks,
    pub orchestrator: BuildOrchestrator,
    pub previews: PreviewRegistry,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        workspace: Workspace,
        generator: Arc<dyn CodeGenerator>,
        preview: PreviewSettings,
    ) -> Self {
        let previews = PreviewRegistry::new(preview, workspace.layout().clone());
        Self {
            orchestrator: BuildOrchestrator::new(workspace.clone(), generator),
            workspace,
            locks: SessionLocks::new(),
            previews,
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
}

#[derive(Deserialize)]
pub struct SourceForm {
    pub session_id: String,
    pub source_type: String,
}

#[derive(Deserialize)]
pub struct DbSourceForm {
    pub session_id: String,
    pub source_type: String,
    pub uri: String,
    pub database: String,
    pub collection_or_table: String,
}

#[derive(Deserialize)]
pub struct EmbeddingForm {
    pub session_id: String,
    pub model_name: String,
}

#[derive(Deserialize)]
pub struct VectorDbForm {
    pub session_id: String,
    pub vector_db: String,
}

#[derive(Deserialize)]
pub struct RemoteVectorDbForm {
    pub session_id: String,
    pub api_key: String,
    pub environment: String,
    pub index_name: String,
}

#[derive(Deserialize)]
pub struct LocalVectorDbForm {
    pub session_id: String,
    pub vector_db: String,
    pub url: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: u32,
    #[serde(default = "default_distance_metric")]
    pub distance_metric: String,
}

fn default_dimensions() -> u32 {
    384
}

fn default_distance_metric() -> String {
    "cosine".to_string()
}

#[derive(Deserialize)]
pub struct ProviderForm {
    pub session_id: String,
    pub provider: String,
}

#[derive(Deserialize)]
pub struct CredentialsForm {
    pub session_id: String,
    pub api_key: String,
    pub model_name: String,
}

#[derive(Deserialize)]
pub struct SystemPromptForm {
    pub session_id: String,
    pub prompt: String,
}

#[derive(Deserialize)]
pub struct UiForm {
    pub session_id: String,
    pub ui: String,
}

#[derive(Deserialize)]
pub struct BuildForm {
    pub session_id: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Carries every missing field so the client can show them all at once.
    Validation(Vec<String>),
    Internal(String),
}

impl From<BuilderError> for ApiError {
    fn from(err: BuilderError) -> Self {
        match err {
            BuilderError::Validation { missing } => ApiError::Validation(missing),
            BuilderError::InvalidInput(msg) => ApiError::BadRequest(msg),
            BuilderError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({"error": msg})),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({"error": msg})),
            ApiError::Validation(missing) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": BuilderError::Validation { missing: missing.clone() }.to_string(),
                    "detail": missing,
                }),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": msg})),
        };
        (status, Json(body)).into_response()
    }
}

fn parse_choice<T>(raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = String>,
{
    raw.trim().parse().map_err(ApiError::BadRequest)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/source", post(select_source_type))
        .route(
            "/api/source/upload",
            post(upload_source_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/source/db", post(configure_source_db))
        .route("/api/embeddings/model", post(set_embedding_model))
        .route("/api/vectordb", post(choose_vector_db))
        .route("/api/vectordb/credentials/remote", post(configure_remote_vectordb))
        .route("/api/vectordb/credentials/local", post(configure_local_vectordb))
        .route("/api/llm/provider", post(set_llm_provider))
        .route("/api/llm/credentials", post(set_llm_credentials))
        .route("/api/system-prompt", post(set_system_prompt))
        .route("/api/ui", post(select_ui_framework))
        .route("/api/build/agent", post(build_agent))
        .route("/api/previews/{id}/start", post(start_preview))
        .route("/api/previews/{id}/stop", post(stop_preview))
        .route("/api/builds/{id}/download", get(download_build))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Run `f` on the blocking pool while holding the session's lock, so a
/// read-modify-write of the session and its splice never interleaves with
/// another request for the same session.
async fn with_session<F, R>(state: &SharedState, session_id: &str, f: F) -> Result<R, ApiError>
where
    F: FnOnce(&Workspace) -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    validate_session_id(session_id)?;
    let _guard = state.locks.acquire(session_id).await;
    Ok(state.workspace.call(f).await?)
}

/// Store `value` under `key`, then render `section/variant` against the
/// updated configuration.
fn record_and_render(
    ws: &Workspace,
    session_id: &str,
    key: &str,
    value: Value,
    renders: &[(Section, String)],
) -> Result<Vec<RenderOutcome>> {
    ws.store.update(session_id, key, value)?;
    let config = ws.store.get_config(session_id)?;
    renders
        .iter()
        .map(|(section, variant)| ws.renderer.render_and_save(session_id, *section, variant, &config))
        .collect()
}

fn outcome_summary(outcomes: &[RenderOutcome]) -> Value {
    let rendered: Vec<String> = outcomes
        .iter()
        .filter_map(|o| match o {
            RenderOutcome::Rendered(section) => Some(section.key()),
            RenderOutcome::Skipped { .. } => None,
        })
        .collect();
    let skipped: Vec<Value> = outcomes
        .iter()
        .filter_map(|o| match o {
            RenderOutcome::Skipped { section, reason } => {
                Some(json!({"section": section.as_str(), "reason": reason}))
            }
            RenderOutcome::Rendered(_) => None,
        })
        .collect();
    json!({"rendered": rendered, "skipped": skipped})
}

fn message_with(message: String, outcomes: &[RenderOutcome]) -> Json<Value> {
    let mut body = outcome_summary(outcomes);
    body["message"] = Value::String(message);
    Json(body)
}

// ── Session handlers ──────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_session(
    State(state): State<SharedState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let kind = match req.agent_type.as_deref() {
        Some(raw) => parse_choice::<AgentKind>(raw)?,
        None => AgentKind::default(),
    };
    let session_id = uuid::Uuid::new_v4().to_string();
    let name = req.name.filter(|n| !n.trim().is_empty());

    let id = session_id.clone();
    let stored_name = name.clone();
    with_session(&state, &session_id, move |ws| {
        if let Some(name) = stored_name {
            ws.store.update(&id, "name", Value::String(name))?;
        }
        ws.store.update_with(&id, "agent_type", &kind)?;
        ws.layout().ensure_session_dir(&id)?;
        Ok(())
    })
    .await?;

    tracing::info!(session_id = %session_id, agent_type = %kind, "session created");
    Ok((
        StatusCode::CREATED,
        Json(json!({"session_id": session_id, "name": name, "agent_type": kind})),
    ))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_session_id(&session_id)?;
    let id = session_id.clone();
    let (doc, status) = state
        .workspace
        .call(move |ws| {
            let doc = ws.store.get(&id)?;
            let status = build::assess(ws, &id)?;
            Ok((doc, status))
        })
        .await?;
    if doc.is_empty() {
        return Err(ApiError::NotFound(format!("No session found for '{}'", session_id)));
    }
    Ok(Json(json!({
        "session_id": session_id,
        "config": redact_secrets(&Value::Object(doc)),
        "state": status.state,
        "missing": status.missing,
    })))
}

// ── Source handlers ───────────────────────────────────────────────────

async fn select_source_type(
    State(state): State<SharedState>,
    Form(form): Form<SourceForm>,
) -> Result<impl IntoResponse, ApiError> {
    let source_type: SourceType = parse_choice(&form.source_type)?;
    let id = form.session_id.clone();
    let outcomes = with_session(&state, &form.session_id, move |ws| {
        let kind = ws.store.get_config(&id)?.kind();
        let variant = source_type.template_variant();
        if !ws.renderer.templates().exists(kind, Section::Source.as_str(), variant) {
            return Err(BuilderError::InvalidInput(format!(
                "Source type '{}' is not supported for {} agents",
                source_type, kind
            )));
        }
        record_and_render(
            ws,
            &id,
            "source",
            serde_json::to_value(SourceConfig::of_type(source_type))?,
            &[(Section::Source, variant.to_string())],
        )
    })
    .await?;
    Ok(message_with(
        format!("Source type '{}' recorded and template rendered.", source_type),
        &outcomes,
    ))
}

async fn upload_source_file(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut session_id = None;
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "session_id" => {
                session_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                upload = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }
    let session_id =
        session_id.ok_or_else(|| ApiError::BadRequest("Missing session_id field".into()))?;
    let (file_name, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("Missing file field".into()))?;

    let ext = std::path::Path::new(&file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::BadRequest("File must have an extension.".into()))?;
    let stored_name = format!("data.{}", ext);

    let id = session_id.clone();
    let name = stored_name.clone();
    let size = bytes.len();
    let outcomes = with_session(&state, &session_id, move |ws| {
        let source = ws.store.get_config(&id)?.source;
        let Some(source) = source.filter(|s| s.kind.is_file_based()) else {
            return Err(BuilderError::InvalidInput(
                "Current source type does not support file upload.".into(),
            ));
        };
        let dir = ws.layout().ensure_session_dir(&id)?;
        crate::util::write_atomic(&dir.join(&name), &bytes)?;
        record_and_render(
            ws,
            &id,
            "source_file",
            Value::String(name),
            &[(Section::Source, source.kind.template_variant().to_string())],
        )
    })
    .await?;

    tracing::info!(session_id = %session_id, file = %stored_name, bytes = size, "source file uploaded");
    Ok(message_with(
        format!("Uploaded to {} and template updated.", stored_name),
        &outcomes,
    ))
}

fn sqlite_path(uri: &str) -> String {
    let uri = uri.trim();
    uri.strip_prefix("sqlite:///")
        .map(|rest| format!("/{}", rest.trim_start_matches('/')))
        .or_else(|| uri.strip_prefix("sqlite://").map(str::to_string))
        .unwrap_or_else(|| uri.to_string())
}

fn db_source_config(form: &DbSourceForm, source_type: SourceType) -> Result<SourceConfig, ApiError> {
    let mut source = SourceConfig::of_type(source_type);
    source.uri = Some(form.uri.clone());
    source.database = Some(form.database.clone());
    source.collection_or_table = Some(form.collection_or_table.clone());
    source.table = Some(form.collection_or_table.clone());

    if source_type == SourceType::Sqlite {
        source.db_path = Some(sqlite_path(&form.uri));
        return Ok(source);
    }

    let location = parse_db_uri(&form.uri)?;
    let dbname = match location.dbname() {
        "" => form.database.clone(),
        name => name.to_string(),
    };
    source.scheme = Some(location.scheme);
    source.host = Some(location.host);
    source.port = Some(location.port);
    source.user = Some(location.user);
    source.password = Some(location.password);
    source.dbname = Some(dbname);
    Ok(source)
}

async fn configure_source_db(
    State(state): State<SharedState>,
    Form(form): Form<DbSourceForm>,
) -> Result<impl IntoResponse, ApiError> {
    let source_type: SourceType = parse_choice(&form.source_type)?;
    if !source_type.is_database() {
        return Err(ApiError::BadRequest("Unsupported DB type.".into()));
    }
    let source = db_source_config(&form, source_type)?;

    let id = form.session_id.clone();
    let outcomes = with_session(&state, &form.session_id, move |ws| {
        let kind = ws.store.get_config(&id)?.kind();
        if !ws.renderer.templates().exists(kind, Section::Source.as_str(), source_type.template_variant()) {
            return Err(BuilderError::InvalidInput(format!(
                "Source type '{}' is not supported for {} agents",
                source_type, kind
            )));
        }
        record_and_render(
            ws,
            &id,
            "source",
            serde_json::to_value(&source)?,
            &[(Section::Source, source_type.template_variant().to_string())],
        )
    })
    .await?;
    Ok(message_with(
        format!("DB source '{}' configured and template rendered.", source_type),
        &outcomes,
    ))
}

// ── Retrieval handlers ────────────────────────────────────────────────

async fn set_embedding_model(
    State(state): State<SharedState>,
    Form(form): Form<EmbeddingForm>,
) -> Result<impl IntoResponse, ApiError> {
    let model_name = form.model_name.trim().to_string();
    if model_name.is_empty() {
        return Err(ApiError::BadRequest("model_name must not be empty".into()));
    }
    let backend = EmbeddingBackend::infer(&model_name);
    let embedding = EmbeddingConfig {
        kind: backend,
        model_name: model_name.clone(),
        dimensions: None,
    };

    let id = form.session_id.clone();
    let outcomes = with_session(&state, &form.session_id, move |ws| {
        record_and_render(
            ws,
            &id,
            "embedding",
            serde_json::to_value(&embedding)?,
            &[(Section::Embedding, backend.template_variant().to_string())],
        )
    })
    .await?;
    Ok(message_with(
        format!(
            "Embedding model '{}' set ({}) and template rendered.",
            model_name,
            backend.as_str()
        ),
        &outcomes,
    ))
}

async fn choose_vector_db(
    State(state): State<SharedState>,
    Form(form): Form<VectorDbForm>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: VectorStoreKind = parse_choice(&form.vector_db)?;
    let id = form.session_id.clone();
    with_session(&state, &form.session_id, move |ws| {
        ws.store
            .update_with(&id, "vector_store", &VectorStoreConfig::of_kind(kind))?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({"message": format!("Vector DB '{}' selected.", kind.as_str())})))
}

async fn configure_remote_vectordb(
    State(state): State<SharedState>,
    Form(form): Form<RemoteVectorDbForm>,
) -> Result<impl IntoResponse, ApiError> {
    let store = VectorStoreConfig {
        api_key: Some(form.api_key),
        environment: Some(form.environment),
        index_name: Some(form.index_name),
        ..VectorStoreConfig::of_kind(VectorStoreKind::Pinecone)
    };
    let id = form.session_id.clone();
    let outcomes = with_session(&state, &form.session_id, move |ws| {
        record_and_render(
            ws,
            &id,
            "vector_store",
            serde_json::to_value(&store)?,
            &[(Section::VectorStore, VectorStoreKind::Pinecone.as_str().to_string())],
        )
    })
    .await?;
    Ok(message_with(
        "Pinecone credentials saved and template rendered.".to_string(),
        &outcomes,
    ))
}

async fn configure_local_vectordb(
    State(state): State<SharedState>,
    Form(form): Form<LocalVectorDbForm>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: VectorStoreKind = parse_choice(&form.vector_db)?;
    if !kind.is_local() {
        return Err(ApiError::BadRequest("Invalid local vector DB".into()));
    }
    let collection_name = short_id("rag");
    let store = VectorStoreConfig {
        url: Some(normalize_http_url(&form.url)),
        collection_name: Some(collection_name.clone()),
        dimensions: Some(form.dimensions),
        distance_metric: Some(form.distance_metric.to_lowercase()),
        ..VectorStoreConfig::of_kind(kind)
    };

    let id = form.session_id.clone();
    let outcomes = with_session(&state, &form.session_id, move |ws| {
        record_and_render(
            ws,
            &id,
            "vector_store",
            serde_json::to_value(&store)?,
            &[(Section::VectorStore, kind.as_str().to_string())],
        )
    })
    .await?;
    let mut body = message_with(
        format!(
            "{} configured. Collection <{}> will be created on first ingest.",
            kind.as_str(),
            collection_name
        ),
        &outcomes,
    );
    body["collection_name"] = Value::String(collection_name);
    Ok(body)
}

// ── LLM, prompt and UI handlers ───────────────────────────────────────

async fn set_llm_provider(
    State(state): State<SharedState>,
    Form(form): Form<ProviderForm>,
) -> Result<impl IntoResponse, ApiError> {
    let provider: LlmProvider = parse_choice(&form.provider)?;
    let id = form.session_id.clone();
    with_session(&state, &form.session_id, move |ws| {
        ws.store.update(
            &id,
            "llm",
            json!({"type": provider.as_str(), "provider": provider.as_str()}),
        )?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({
        "message": format!("LLM provider '{}' recorded. Awaiting credentials.", provider.as_str())
    })))
}

async fn set_llm_credentials(
    State(state): State<SharedState>,
    Form(form): Form<CredentialsForm>,
) -> Result<impl IntoResponse, ApiError> {
    let id = form.session_id.clone();
    let api_key = form.api_key;
    let model_name = form.model_name.trim().to_string();
    let outcomes = with_session(&state, &form.session_id, move |ws| {
        let mut llm = ws.store.get_config(&id)?.llm.unwrap_or_default();
        let Some(provider) = llm.kind else {
            return Err(BuilderError::InvalidInput("Set provider first".into()));
        };
        llm.api_key = Some(api_key);
        llm.model_name = Some(model_name.clone());
        record_and_render(
            ws,
            &id,
            "llm",
            serde_json::to_value(&llm)?,
            &[
                (Section::Llm, provider.as_str().to_string()),
                (Section::Models, model_name),
            ],
        )
    })
    .await?;
    Ok(message_with(
        "LLM credentials saved and templates rendered.".to_string(),
        &outcomes,
    ))
}

async fn set_system_prompt(
    State(state): State<SharedState>,
    Form(form): Form<SystemPromptForm>,
) -> Result<impl IntoResponse, ApiError> {
    let id = form.session_id.clone();
    let prompt = form.prompt;
    let outcomes = with_session(&state, &form.session_id, move |ws| {
        record_and_render(
            ws,
            &id,
            "system_prompt",
            Value::String(prompt),
            &[(Section::Prompt, "default".to_string())],
        )
    })
    .await?;
    Ok(message_with(
        "System prompt updated and template rendered.".to_string(),
        &outcomes,
    ))
}

async fn select_ui_framework(
    State(state): State<SharedState>,
    Form(form): Form<UiForm>,
) -> Result<impl IntoResponse, ApiError> {
    let ui: UiFramework = parse_choice(&form.ui)?;
    let id = form.session_id.clone();
    let outcomes = with_session(&state, &form.session_id, move |ws| {
        record_and_render(
            ws,
            &id,
            "ui",
            serde_json::to_value(UiConfig { kind: ui })?,
            &[(Section::Ui, ui.as_str().to_string())],
        )
    })
    .await?;
    Ok(message_with(
        format!("UI '{}' configured and template rendered.", ui),
        &outcomes,
    ))
}

// ── Build, preview and download handlers ──────────────────────────────

async fn build_agent(
    State(state): State<SharedState>,
    Form(form): Form<BuildForm>,
) -> Result<impl IntoResponse, ApiError> {
    validate_session_id(&form.session_id)?;
    let _guard = state.locks.acquire(&form.session_id).await;
    let output = state.orchestrator.build(&form.session_id).await?;
    Ok(Json(json!({
        "message": "Agent generated successfully.",
        "path": output.output_dir.join(MAIN_FILE),
        "session_id": output.session_id,
        "requirements": output.metadata.requirements,
    })))
}

async fn start_preview(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_session_id(&session_id)?;
    let _guard = state.locks.acquire(&session_id).await;
    let info = state.previews.launch(&session_id).await?;
    Ok(Json(json!({
        "message": format!("{} preview started.", info.framework),
        "session_id": info.session_id,
        "preview_url": info.preview_url,
        "pid": info.pid,
        "log_file": info.log_file,
    })))
}

async fn stop_preview(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_session_id(&session_id)?;
    let stopped = state.previews.stop(&session_id).await?;
    let message = if stopped {
        "Preview stopped."
    } else {
        "No preview running."
    };
    Ok(Json(json!({"message": message, "session_id": session_id, "stopped": stopped})))
}

async fn download_build(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let dir = state.workspace.layout().session_dir(&session_id)?;
    let bytes = state
        .workspace
        .call(move |_| archive::zip_dir(&dir))
        .await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.zip\"", session_id),
            ),
        ],
        bytes,
    ))
}
