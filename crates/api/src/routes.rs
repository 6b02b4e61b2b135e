use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use extract::Relation;
use graph::{GraphModel, Highlight, outline::TOPIC_TYPE, type_color};
use ingest::{Segment, split_markup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::{CacheStats, CachedEmbedder};
use crate::course::CourseSource;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::session::{AskOutcome, GraphCounts, ImportOutcome, Pipeline, Session};

/// Number of knowledge points returned by a search.
const POINT_SEARCH_LIMIT: usize = 5;

pub struct AppState {
    pub pipeline: Pipeline,
    pub session: Mutex<Session>,
    /// Root that import paths are resolved against.
    pub documents: PathBuf,
    pub course: CourseSource,
    pub metrics: Arc<Metrics>,
    pub cache: Option<Arc<CachedEmbedder>>,
    pub health: HealthTargets,
}

/// Collaborator base URLs probed by `/health`.
pub struct HealthTargets {
    pub vector_endpoint: String,
    pub ollama_url: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/documents/import", post(import_document))
        .route("/ask", post(ask))
        .route("/graph", get(session_graph))
        .route("/graph/reset", post(reset_graph))
        .route("/graph/highlight", post(highlight_session))
        .route("/course/graph", get(course_graph))
        .route("/course/highlight", post(highlight_course))
        .route("/course/points", get(search_points))
        .route("/course/point", get(knowledge_point))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    vector_store: String,
    ollama: String,
}

async fn probe(url: &str) -> String {
    match reqwest::get(url).await {
        Ok(resp) if resp.status().is_success() => "ok".to_string(),
        Ok(resp) => format!("error: status {}", resp.status()),
        Err(e) => format!("error: {}", e),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let vector_store = probe(&state.health.vector_endpoint).await;
    let ollama = probe(&format!("{}/api/tags", state.health.ollama_url)).await;
    Json(HealthResponse {
        vector_store,
        ollama,
    })
}

#[derive(Deserialize)]
struct ImportRequest {
    path: String,
}

async fn import_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<Json<ImportOutcome>> {
    if req.path.trim().is_empty() {
        return Err(ApiError::BadRequest("path must not be empty".to_string()));
    }
    let path = resolve_document(&state.documents, req.path.trim()).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "path must be relative to the document root: {}",
            req.path
        ))
    })?;
    let outcome = state.pipeline.import(&path).await?;
    Ok(Json(outcome))
}

/// Join a requested path onto `root`, refusing anything that could leave it.
fn resolve_document(root: &Path, requested: &str) -> Option<PathBuf> {
    let requested = Path::new(requested);
    requested
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then(|| root.join(requested))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn ask(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> ApiResult<Json<AskOutcome>> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }
    let outcome = state.pipeline.ask(&state.session, question).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
struct NodeView {
    id: String,
    label: String,
    #[serde(rename = "type")]
    entity_type: String,
    color: String,
}

/// Graph in the shape a network renderer consumes.
#[derive(Debug, Serialize)]
struct GraphView {
    nodes: Vec<NodeView>,
    edges: Vec<Relation>,
    type_counts: BTreeMap<String, usize>,
}

impl From<&GraphModel> for GraphView {
    fn from(graph: &GraphModel) -> Self {
        Self {
            nodes: graph
                .entities()
                .iter()
                .map(|e| NodeView {
                    id: e.id.clone(),
                    label: e.label.clone(),
                    entity_type: e.entity_type.clone(),
                    color: type_color(&e.entity_type).to_string(),
                })
                .collect(),
            edges: graph.relations().to_vec(),
            type_counts: graph.type_counts(),
        }
    }
}

async fn session_graph(State(state): State<Arc<AppState>>) -> Json<GraphView> {
    let session = state.session.lock().await;
    Json(GraphView::from(session.graph()))
}

async fn reset_graph(State(state): State<Arc<AppState>>) -> Json<GraphCounts> {
    let mut session = state.session.lock().await;
    session.reset();
    Json(session.counts())
}

#[derive(Deserialize)]
struct HighlightRequest {
    #[serde(default)]
    selected: Vec<String>,
    root: Option<String>,
}

async fn highlight_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HighlightRequest>,
) -> Json<Highlight> {
    let session = state.session.lock().await;
    Json(graph::highlight(session.graph(), req.root.as_deref(), &req.selected))
}

async fn course_graph(State(state): State<Arc<AppState>>) -> ApiResult<Json<GraphView>> {
    let course = state.course.get().await?;
    Ok(Json(GraphView::from(&course.graph)))
}

async fn highlight_course(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HighlightRequest>,
) -> ApiResult<Json<Highlight>> {
    let course = state.course.get().await?;
    Ok(Json(graph::highlight(&course.graph, req.root.as_deref(), &req.selected)))
}

#[derive(Deserialize)]
struct PointSearch {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct PointHit {
    id: String,
    label: String,
}

async fn search_points(
    State(state): State<Arc<AppState>>,
    Query(search): Query<PointSearch>,
) -> ApiResult<Json<Vec<PointHit>>> {
    let course = state.course.get().await?;
    let hits = course
        .graph
        .search(Some(TOPIC_TYPE), search.q.trim())
        .into_iter()
        .take(POINT_SEARCH_LIMIT)
        .map(|e| PointHit {
            id: e.id.clone(),
            label: e.label.clone(),
        })
        .collect();
    Ok(Json(hits))
}

#[derive(Deserialize)]
struct PointLookup {
    label: String,
}

#[derive(Serialize)]
struct PointContent {
    label: String,
    segments: Vec<Segment>,
}

async fn knowledge_point(
    State(state): State<Arc<AppState>>,
    Query(lookup): Query<PointLookup>,
) -> ApiResult<Json<PointContent>> {
    let course = state.course.get().await?;
    let content = course
        .content
        .as_deref()
        .ok_or_else(|| ApiError::Upstream("course content is not available".to_string()))?;
    let text = graph::knowledge_point_content(content, &lookup.label)
        .ok_or_else(|| ApiError::NotFound(format!("knowledge point '{}'", lookup.label)))?;

    Ok(Json(PointContent {
        label: lookup.label,
        segments: split_markup(text),
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    metrics: MetricsSnapshot,
    cache: Option<CacheStats>,
    graph: GraphCounts,
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let graph = state.session.lock().await.counts();
    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        cache: state.cache.as_ref().map(|c| c.stats()),
        graph,
    })
}
