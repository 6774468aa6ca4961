//! Hearth HTTP server
//!
//! Run with: hearth-server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hearth::completion::create_completion_service;
use hearth::credits::{CreditGate, CreditLedger, UnlimitedCredits};
use hearth::error::{HearthError, Result};
use hearth::intelligence::{DiagnosticStrategy, LlmStrategy, RuleBasedStrategy};
use hearth::storage::{export_user, import_user, HearthExport, Storage};
use hearth::types::*;
use hearth::{ChatOrchestrator, ChatReply, CompletionConfig, DiagnosisReport, ReplyStatus};

#[derive(Parser, Debug)]
#[command(name = "hearth-server")]
#[command(about = "Hearth HTTP server for parenting-coach chat")]
struct Args {
    /// Database path
    #[arg(
        long,
        env = "HEARTH_DB_PATH",
        default_value = "~/.local/share/hearth/hearth.db"
    )]
    db_path: String,

    /// Storage mode (local or cloud-safe)
    #[arg(long, env = "HEARTH_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// Listen address
    #[arg(long, env = "HEARTH_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Listen port
    #[arg(long, env = "HEARTH_PORT", default_value = "8080")]
    port: u16,

    /// OpenAI-compatible API key
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_key: Option<String>,

    /// Completion endpoint base URL
    #[arg(long, env = "HEARTH_COMPLETION_BASE_URL")]
    completion_base_url: Option<String>,

    /// Completion model
    #[arg(long, env = "HEARTH_COMPLETION_MODEL")]
    completion_model: Option<String>,

    /// Diagnostic strategy (llm or rules)
    #[arg(long, env = "HEARTH_DIAGNOSTIC_STRATEGY", default_value = "llm")]
    strategy: String,

    /// Credits granted to each new user (unmetered when omitted)
    #[arg(long, env = "HEARTH_STARTING_CREDITS")]
    starting_credits: Option<u64>,

    /// JSON file with pipeline tunables
    #[arg(long, env = "HEARTH_PIPELINE_CONFIG")]
    pipeline_config: Option<String>,

    /// Token budget for the rendered system prompt
    #[arg(long, env = "HEARTH_CONTEXT_TOKEN_BUDGET")]
    context_token_budget: Option<usize>,

    /// Diagnostic cache freshness window in hours
    #[arg(long, env = "HEARTH_DIAGNOSTIC_TTL_HOURS")]
    diagnostic_ttl_hours: Option<i64>,

    /// Emit logs as JSON lines
    #[arg(long, env = "HEARTH_LOG_JSON")]
    log_json: bool,
}

type AppState = Arc<ChatOrchestrator>;

/// `HearthError` rendered as an HTTP response
struct ApiError(HearthError);

impl From<HearthError> for ApiError {
    fn from(e: HearthError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HearthError::OutOfCredits(_) => StatusCode::PAYMENT_REQUIRED,
            HearthError::NotFound(_) => StatusCode::NOT_FOUND,
            HearthError::InvalidInput(_) | HearthError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            HearthError::Http(_) | HearthError::Completion(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(json!({ "error": self.0.code(), "message": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Deserialize)]
struct ChatRequest {
    user_id: String,
    message: String,
}

#[derive(Deserialize)]
struct DiagnosticsRequest {
    user_id: String,
    person: String,
}

#[derive(Deserialize)]
struct CreateProfileRequest {
    name: String,
    #[serde(default)]
    relationship: Relationship,
    #[serde(default)]
    patch: ProfilePatch,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/diagnostics", post(diagnostics_handler))
        .route(
            "/users/:user_id/profiles",
            get(list_profiles_handler).post(create_profile_handler),
        )
        .route(
            "/profiles/:profile_id",
            delete(delete_profile_handler).patch(patch_profile_handler),
        )
        .route("/users/:user_id/export", get(export_handler))
        .route("/users/:user_id/import", post(import_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": hearth::VERSION,
    }))
}

async fn chat_handler(
    State(orchestrator): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatReply> {
    let reply = orchestrator
        .handle_message(&request.user_id, &request.message)
        .await?;
    if reply.status == ReplyStatus::OutOfCredits {
        return Err(HearthError::OutOfCredits(request.user_id).into());
    }
    Ok(Json(reply))
}

async fn diagnostics_handler(
    State(orchestrator): State<AppState>,
    Json(request): Json<DiagnosticsRequest>,
) -> ApiResult<DiagnosisReport> {
    let report = orchestrator
        .diagnose(&request.user_id, &request.person)
        .await?;
    Ok(Json(report))
}

async fn list_profiles_handler(
    State(orchestrator): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<PersonProfile>> {
    Ok(Json(orchestrator.store().get_profiles(&user_id)?))
}

async fn create_profile_handler(
    State(orchestrator): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<CreateProfileRequest>,
) -> std::result::Result<(StatusCode, Json<PersonProfile>), ApiError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(HearthError::InvalidInput("profile name is empty".to_string()).into());
    }
    if orchestrator.store().get_profile(&user_id, name)?.is_some() {
        return Err(HearthError::InvalidInput(format!("profile '{}' already exists", name)).into());
    }
    let profile = orchestrator.store().create_profile(&NewProfile {
        user_id,
        name: name.to_string(),
        relationship: request.relationship,
        patch: request.patch,
    })?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn patch_profile_handler(
    State(orchestrator): State<AppState>,
    Path(profile_id): Path<String>,
    Json(patch): Json<ProfilePatch>,
) -> ApiResult<PersonProfile> {
    Ok(Json(orchestrator.store().update_profile(&profile_id, &patch)?))
}

async fn delete_profile_handler(
    State(orchestrator): State<AppState>,
    Path(profile_id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    if orchestrator.store().get_profile_by_id(&profile_id)?.is_none() {
        return Err(HearthError::NotFound(format!("profile {}", profile_id)).into());
    }
    orchestrator.store().delete_profile(&profile_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export_handler(
    State(orchestrator): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<HearthExport> {
    Ok(Json(export_user(orchestrator.store().as_ref(), &user_id)?))
}

async fn import_handler(
    State(orchestrator): State<AppState>,
    Path(user_id): Path<String>,
    Json(export): Json<HearthExport>,
) -> std::result::Result<StatusCode, ApiError> {
    if export.user_id != user_id {
        return Err(HearthError::InvalidInput(format!(
            "export belongs to user '{}'",
            export.user_id
        ))
        .into());
    }
    import_user(orchestrator.store().as_ref(), &export)?;
    Ok(StatusCode::NO_CONTENT)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hearth=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init();
    }
}

fn load_pipeline_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.pipeline_config {
        Some(path) => {
            let path = shellexpand::tilde(path).to_string();
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(budget) = args.context_token_budget {
        config.context_token_budget = budget;
    }
    if let Some(ttl) = args.diagnostic_ttl_hours {
        config.diagnostic_ttl_hours = ttl;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    // Expand ~ in path
    let db_path = shellexpand::tilde(&args.db_path).to_string();

    // Determine storage mode
    let storage_mode = match args.storage_mode.as_str() {
        "cloud-safe" => StorageMode::CloudSafe,
        _ => StorageMode::Local,
    };

    let storage = Storage::open(StorageConfig {
        db_path,
        storage_mode,
    })?;

    // Check for storage mode warning
    if let Some(warning) = storage.storage_mode_warning() {
        tracing::warn!("{}", warning);
    }

    let mut completion_config = CompletionConfig::from_env();
    if args.openai_key.is_some() {
        completion_config.api_key = args.openai_key.clone();
    }
    if let Some(base_url) = &args.completion_base_url {
        completion_config.base_url = base_url.clone();
    }
    if let Some(model) = &args.completion_model {
        completion_config.model = model.clone();
    }
    let completion = create_completion_service(&completion_config);

    let strategy: Arc<dyn DiagnosticStrategy> = match args.strategy.as_str() {
        "rules" => Arc::new(RuleBasedStrategy::default()),
        _ => Arc::new(LlmStrategy::new(completion.clone())),
    };

    let credits: Arc<dyn CreditGate> = match args.starting_credits {
        Some(balance) => Arc::new(CreditLedger::new(balance)),
        None => Arc::new(UnlimitedCredits),
    };

    let orchestrator = ChatOrchestrator::new(
        Arc::new(storage),
        completion,
        strategy,
        credits,
        load_pipeline_config(&args)?,
    )?
    .with_chat_options(completion_config.chat_options());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| HearthError::Config(format!("invalid listen address: {}", e)))?;

    tracing::info!(
        %addr,
        strategy = %args.strategy,
        metered = args.starting_credits.is_some(),
        "Hearth server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(Arc::new(orchestrator))).await?;

    Ok(())
}
