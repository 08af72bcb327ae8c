use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use reelsearch_core::{Document, Embedder, HybridSearch, SearchConfig};
use serde_json::Value;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

/// Counts of a few fixed words, enough to make similarity meaningful.
struct WordCountEmbedder;

impl Embedder for WordCountEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(["bear", "city", "shark"].iter().map(|w| lower.matches(w).count() as f32).collect())
    }
}

fn movies() -> Vec<Document> {
    vec![
        Document { id: 1, title: "Paddington".into(), description: "A bear comes to London".into() },
        Document { id: 2, title: "The Revenant".into(), description: "A man is attacked by a bear".into() },
        Document { id: 3, title: "Zootopia".into(), description: "Animals in a city".into() },
        Document { id: 4, title: "Jaws".into(), description: "A shark terrorizes a beach town".into() },
    ]
}

fn app() -> (Router, TempDir) {
    let dir = tempdir().unwrap();
    let engine = HybridSearch::new(movies(), Arc::new(WordCountEmbedder), SearchConfig::new(dir.path()));
    (reelsearch_server::build_app(Arc::new(engine)), dir)
}

async fn call(app: Router, uri: &str) -> (StatusCode, Bytes) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn result_ids(body: &Bytes) -> Vec<u64> {
    let json: Value = serde_json::from_slice(body).unwrap();
    json["results"].as_array().unwrap().iter().map(|r| r["doc_id"].as_u64().unwrap()).collect()
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _dir) = app();
    let (status, body) = call(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn keyword_search_ranks_by_bm25() {
    let (app, _dir) = app();
    let (status, body) = call(app, "/search?q=shark&mode=keyword&limit=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result_ids(&body), vec![4]);
}

#[tokio::test]
async fn rrf_is_the_default_mode() {
    let (app, _dir) = app();
    let (status, body) = call(app, "/search?q=bear&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["mode"], "rrf");
    assert_eq!(json["total_hits"], 2);
    let ids = result_ids(&body);
    assert!(ids.contains(&1) && ids.contains(&2));
    assert_eq!(json["results"][0]["bm25_rank"], 0);
}

#[tokio::test]
async fn weighted_alpha_out_of_range_is_rejected() {
    let (app, _dir) = app();
    let (status, _) = call(app, "/search?q=bear&mode=weighted&alpha=1.5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rerank_without_collaborator_is_rejected() {
    let (app, _dir) = app();
    let (status, body) = call(app, "/search?q=bear&rerank=batch").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("batch"));
}

#[tokio::test]
async fn doc_lookup_and_missing_doc() {
    let (app, _dir) = app();
    let (status, body) = call(app.clone(), "/doc/3").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["title"], "Zootopia");

    let (status, _) = call(app, "/doc/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
