use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
};
use progress_flow::{FlowError, FlowRunner, InMemoryRunStorage, RunRecord, RunStatus};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    citations::{annotate, cited_ids},
    config::AppConfig,
    error::{AssistantError, Result},
    export::ExportFormat,
    mesh::{DEFAULT_MAX_COMBINATIONS, generate_combinations, queries_or_fallback},
    models::{
        ExportParams, IntroductionRequest, MeshParams, MeshQueryRequest,
        SaveResultsRequest, SearchParams, ThemeSuggestionRequest,
    },
    orchestrator::ThemeExtractionOrchestrator,
    pubmed::{DEFAULT_MAX_RESULTS, LiteratureSearch, MeshVocabulary, PubMedClient, SearchFilter},
    saved::{JsonFileStore, SavedResults},
    tasks::{RigGenerator, generate_mesh_query, suggest_theme},
    themes::{DEFAULT_IMPORTANCE, themes_from_text, validate_themes},
};

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn assistant_error(message: &str, e: &AssistantError) -> ApiError {
    let status = match e {
        AssistantError::InvalidArgument(_)
        | AssistantError::EmptyInput
        | AssistantError::PromptTooLarge { .. } => StatusCode::BAD_REQUEST,
        AssistantError::Search(_) | AssistantError::GenerationFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        AssistantError::Cancelled => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("{}: {:#}", message, e);
    }
    (
        status,
        Json(json!({
            "error": message,
            "details": e.to_string()
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<dyn LiteratureSearch>,
    pub vocabulary: Arc<dyn MeshVocabulary>,
    pub saved: Arc<SavedResults>,
    pub orchestrator: Arc<ThemeExtractionOrchestrator>,
    pub flow_runner: FlowRunner,
}

impl AppState {
    pub fn new(
        search: Arc<dyn LiteratureSearch>,
        vocabulary: Arc<dyn MeshVocabulary>,
        saved: Arc<SavedResults>,
        orchestrator: Arc<ThemeExtractionOrchestrator>,
    ) -> Self {
        Self {
            search,
            vocabulary,
            saved,
            orchestrator,
            flow_runner: FlowRunner::new(Arc::new(InMemoryRunStorage::new())),
        }
    }

    /// Keep settled introduction runs readable for `retention`
    pub fn with_run_retention(mut self, retention: Duration) -> Self {
        self.flow_runner = self.flow_runner.with_retention(retention);
        self
    }
}

pub async fn create_app(config: &AppConfig) -> Result<Router> {
    let app_state = create_app_state(config).await?;
    Ok(build_router(app_state))
}

async fn create_app_state(config: &AppConfig) -> Result<AppState> {
    let pubmed = Arc::new(PubMedClient::new(config.ncbi_api_key.clone()));
    let saved = SavedResults::load(Arc::new(JsonFileStore::new(&config.saved_results_path))).await?;
    let generator = Arc::new(RigGenerator::new(
        config.openrouter_api_key.clone(),
        config.model.clone(),
    ));
    let orchestrator = ThemeExtractionOrchestrator::new(generator, config.timing())
        .with_prompt_token_budget(config.prompt_token_budget);

    Ok(AppState::new(
        pubmed.clone(),
        pubmed,
        Arc::new(saved),
        Arc::new(orchestrator),
    )
    .with_run_retention(config.run_retention()))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/mesh", get(mesh_combinations))
        .route("/mesh/query", post(mesh_query))
        .route("/search", get(search))
        .route("/saved", get(list_saved).post(save_results))
        .route("/saved/export", get(export_saved))
        .route("/saved/{id}", delete(remove_saved))
        .route("/themes/suggest", post(theme_suggestion))
        .route("/introductions", post(start_introduction))
        .route(
            "/introductions/{run_id}",
            get(introduction_status).delete(cancel_introduction),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Research Assistant Service",
        "version": "1.0.0",
        "description": "PubMed search with MeSH expansion, a saved reading list and AI-drafted introductions with citations",
        "endpoints": {
            "GET /mesh?query=": "MeSH terms and AND-combinations for a free-text query",
            "POST /mesh/query": "AI MeSH query for a casual search term",
            "GET /search?query=&year=&author=": "Search PubMed",
            "GET /saved": "List saved articles",
            "POST /saved": "Save articles by PubMed id",
            "DELETE /saved/{id}": "Remove a saved article",
            "GET /saved/export?format=text|endnote": "Export saved articles",
            "POST /themes/suggest": "Suggest a related research theme",
            "POST /introductions": "Start drafting an introduction from the saved articles",
            "GET /introductions/{run_id}": "Stage progress and the annotated draft",
            "DELETE /introductions/{run_id}": "Cancel a draft in progress, or discard a finished one",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

fn require_text<'a>(value: &'a str, what: &str) -> std::result::Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(bad_request_error(&format!("{} is required", what)));
    }
    Ok(value)
}

async fn mesh_combinations(
    State(state): State<AppState>,
    Query(params): Query<MeshParams>,
) -> ApiResult<Value> {
    let query = require_text(&params.query, "Query")?;
    let max_combinations = params.max_combinations.unwrap_or(DEFAULT_MAX_COMBINATIONS);

    let terms = state.vocabulary.lookup_terms(query).await.map_err(|e| {
        assistant_error("MeSH lookup failed", &AssistantError::Search(e.to_string()))
    })?;
    let combinations = generate_combinations(&terms, max_combinations)
        .map_err(|e| assistant_error("Invalid combination request", &e))?;

    info!(query, terms = terms.len(), combinations = combinations.len(), "MeSH expansion");

    Ok(Json(json!({
        "query": query,
        "terms": terms,
        "combinations": combinations
            .iter()
            .map(|c| json!({ "query": c.query(), "terms": c.terms(), "score": c.score() }))
            .collect::<Vec<_>>(),
        "queries": queries_or_fallback(&combinations, query),
    })))
}

async fn mesh_query(
    State(state): State<AppState>,
    Json(request): Json<MeshQueryRequest>,
) -> ApiResult<Value> {
    let mesh_query = generate_mesh_query(state.orchestrator.generator(), &request.search_term)
        .await
        .map_err(|e| assistant_error("Failed to generate MeSH query", &e))?;

    Ok(Json(json!({
        "search_term": request.search_term,
        "mesh_query": mesh_query
    })))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Value> {
    let query = require_text(&params.query, "Query")?;
    let filter = SearchFilter::new(params.year, params.author);

    let summaries = state
        .search
        .search(query, DEFAULT_MAX_RESULTS)
        .await
        .map_err(|e| assistant_error("Search failed", &AssistantError::Search(e.to_string())))?;
    let results = filter.apply(summaries);

    Ok(Json(json!({
        "query": query,
        "count": results.len(),
        "results": results
    })))
}

async fn list_saved(State(state): State<AppState>) -> Json<Value> {
    let documents = state.saved.list().await;
    Json(json!({
        "count": documents.len(),
        "documents": documents
    }))
}

async fn save_results(
    State(state): State<AppState>,
    Json(request): Json<SaveResultsRequest>,
) -> ApiResult<Value> {
    let ids: Vec<String> = request
        .ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(bad_request_error("At least one article id is required"));
    }

    let documents = state.search.fetch_documents(&ids).await.map_err(|e| {
        assistant_error("Failed to fetch articles", &AssistantError::Search(e.to_string()))
    })?;
    let added = state
        .saved
        .add_many(documents)
        .await
        .map_err(|e| assistant_error("Failed to save articles", &e))?;

    info!(requested = ids.len(), added, "Saved articles");
    Ok(Json(json!({
        "added": added,
        "count": state.saved.len().await
    })))
}

async fn remove_saved(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let removed = state
        .saved
        .remove(&id)
        .await
        .map_err(|e| assistant_error("Failed to remove article", &e))?;
    if !removed {
        return Err(not_found_error("Article is not saved", &id));
    }
    Ok(Json(json!({
        "removed": id,
        "count": state.saved.len().await
    })))
}

async fn export_saved(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> std::result::Result<Response, ApiError> {
    let format = ExportFormat::parse(params.format.as_deref())
        .map_err(|e| assistant_error("Unsupported export format", &e))?;
    let body = format
        .render(&state.saved.list().await)
        .map_err(|e| assistant_error("Export failed", &e))?;

    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

async fn theme_suggestion(
    State(state): State<AppState>,
    Json(request): Json<ThemeSuggestionRequest>,
) -> ApiResult<Value> {
    let theme = suggest_theme(state.orchestrator.generator(), &request.themes)
        .await
        .map_err(|e| assistant_error("Failed to suggest a theme", &e))?;
    Ok(Json(json!({ "theme": theme })))
}

async fn start_introduction(
    State(state): State<AppState>,
    Json(request): Json<IntroductionRequest>,
) -> ApiResult<Value> {
    let mut themes = request.themes;
    if let Some(text) = &request.themes_text {
        let extra = themes_from_text(text, DEFAULT_IMPORTANCE)
            .map_err(|e| assistant_error("Invalid themes", &e))?;
        themes.extend(extra);
    }
    validate_themes(&themes).map_err(|e| assistant_error("Invalid themes", &e))?;

    let documents = state.saved.list().await;
    if documents.is_empty() {
        return Err(assistant_error(
            "Cannot draft an introduction",
            &AssistantError::EmptyInput,
        ));
    }

    let stages = state.orchestrator.stages();
    let orchestrator = state.orchestrator.clone();

    let run_id = state
        .flow_runner
        .start(&stages, move |board, cancel| async move {
            let introduction = orchestrator
                .extract_and_generate_with(&documents, &themes, &board, &cancel)
                .await?;
            let segments = annotate(&introduction, &documents);
            Ok::<_, anyhow::Error>(json!({
                "introduction": introduction,
                "cited_ids": cited_ids(&segments),
                "segments": segments
            }))
        })
        .await
        .map_err(|e| internal_error("Failed to start introduction run", &e.to_string()))?;

    info!(run_id = %run_id, "Introduction run started");

    Ok(Json(json!({
        "run_id": run_id,
        "status": "started",
        "stages": stages
    })))
}

async fn load_run(state: &AppState, run_id: &str) -> std::result::Result<RunRecord, ApiError> {
    match state.flow_runner.status(run_id).await {
        Ok(Some(run)) => Ok(run),
        Ok(None) => Err(not_found_error("Run not found", run_id)),
        Err(e) => {
            error!("Failed to load run {}: {}", run_id, e);
            Err(internal_error("Failed to load run", &e.to_string()))
        }
    }
}

fn status_label(status: &RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed { .. } => "completed",
        RunStatus::Failed { .. } => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

async fn introduction_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Value> {
    let run = load_run(&state, &run_id).await?;

    let mut response = json!({
        "run_id": run.id,
        "status": status_label(&run.status),
        "overall_progress": run.board.overall(),
        "stages": run.progress(),
        "started_at": run.started_at.to_rfc3339(),
        "finished_at": run.finished_at.map(|t| t.to_rfc3339()),
    });

    match &run.status {
        RunStatus::Completed { output } => {
            if let Value::Object(fields) = output {
                for (key, value) in fields {
                    response[key.as_str()] = value.clone();
                }
            }
        }
        RunStatus::Failed { error } => {
            response["error"] = json!(error);
        }
        RunStatus::Running | RunStatus::Cancelled => {}
    }

    Ok(Json(response))
}

async fn cancel_introduction(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Value> {
    let run = load_run(&state, &run_id).await?;

    // A settled run has nothing left to cancel, so it is dropped instead
    if run.status.is_finished() {
        state
            .flow_runner
            .discard(&run_id)
            .await
            .map_err(|e| internal_error("Failed to discard run", &e.to_string()))?;
        info!(run_id = %run_id, "Introduction run discarded");
        return Ok(Json(json!({
            "run_id": run_id,
            "status": status_label(&run.status),
            "discarded": true
        })));
    }

    let run = match state.flow_runner.cancel(&run_id).await {
        Ok(run) => run,
        Err(FlowError::RunNotFound(_)) => return Err(not_found_error("Run not found", &run_id)),
        Err(e) => return Err(internal_error("Failed to cancel run", &e.to_string())),
    };

    Ok(Json(json!({
        "run_id": run_id,
        "status": status_label(&run.status),
        "discarded": false
    })))
}
