use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use reelsearch_core::config::{DEFAULT_ALPHA, DEFAULT_SEARCH_LIMIT, RRF_K};
use reelsearch_core::rerank::RerankMethod;
use reelsearch_core::{DocId, FusionRecord, HybridSearch, ScoredDocument, SearchError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Semantic,
    Weighted,
    #[default]
    Rrf,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub mode: SearchMode,
    pub alpha: Option<f32>,
    pub k: Option<u32>,
    /// individual|batch|cross_encoder, RRF mode only
    pub rerank: Option<String>,
}
fn default_limit() -> usize { DEFAULT_SEARCH_LIMIT }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub title: String,
    pub description: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl From<ScoredDocument> for SearchHit {
    fn from(hit: ScoredDocument) -> Self {
        Self {
            doc_id: hit.document.id,
            title: hit.document.title,
            description: hit.document.description,
            score: hit.score,
            bm25_rank: None,
            semantic_rank: None,
            rerank_score: None,
        }
    }
}

impl From<FusionRecord> for SearchHit {
    fn from(rec: FusionRecord) -> Self {
        Self {
            doc_id: rec.document.id,
            title: rec.document.title,
            description: rec.document.description,
            score: rec.fused_score,
            bm25_rank: rec.bm25_rank,
            semantic_rank: rec.semantic_rank,
            rerank_score: rec.rerank_score,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<HybridSearch>,
}

type ApiError = (StatusCode, String);

fn status_for(err: &SearchError) -> StatusCode {
    match err {
        SearchError::InvalidTerm { .. }
        | SearchError::EmptyInput
        | SearchError::InvalidFusionInput(_)
        | SearchError::MissingCollaborator { .. } => StatusCode::BAD_REQUEST,
        SearchError::Collaborator(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: SearchError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "search failed");
    }
    (status, err.to_string())
}

fn cors_layer() -> CorsLayer {
    // CORS_ALLOW_ORIGIN is comma-separated; Any when unset or unparseable
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn build_app(engine: Arc<HybridSearch>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .with_state(AppState { engine })
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let limit = params.limit.clamp(1, MAX_LIMIT);
    let rerank = params
        .rerank
        .as_deref()
        .map(str::parse::<RerankMethod>)
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    if rerank.is_some() && params.mode != SearchMode::Rrf {
        return Err((StatusCode::BAD_REQUEST, "rerank is only supported with mode=rrf".into()));
    }

    let engine = Arc::clone(&state.engine);
    let query = params.q.clone();
    let mode = params.mode;
    let (alpha, k) = (params.alpha.unwrap_or(DEFAULT_ALPHA), params.k.unwrap_or(RRF_K));
    // index loads, embedding calls and rerank throttling all block
    let results: Vec<SearchHit> = tokio::task::spawn_blocking(move || -> Result<Vec<SearchHit>, SearchError> {
        Ok(match mode {
            SearchMode::Keyword => engine.keyword_search(&query, limit)?.into_iter().map(SearchHit::from).collect(),
            SearchMode::Semantic => engine.semantic_search(&query, limit)?.into_iter().map(SearchHit::from).collect(),
            SearchMode::Weighted => engine.weighted_search(&query, alpha, limit)?.into_iter().map(SearchHit::from).collect(),
            SearchMode::Rrf => engine.rrf_search(&query, k, limit, rerank)?.into_iter().map(SearchHit::from).collect(),
        })
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(api_error)?;

    let elapsed = start.elapsed();
    tracing::info!(query = %params.q, ?mode, hits = results.len(), took_s = elapsed.as_secs_f64(), "search");
    Ok(Json(SearchResponse {
        query: params.q,
        mode,
        took_s: elapsed.as_secs_f64(),
        total_hits: results.len(),
        results,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<DocId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.engine.document(doc_id) {
        Some(doc) => Ok(Json(serde_json::json!({
            "doc_id": doc.id,
            "title": doc.title,
            "description": doc.description,
        }))),
        None => Err((StatusCode::NOT_FOUND, format!("document {doc_id} not found"))),
    }
}
