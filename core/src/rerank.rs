//! Post-fusion reordering by an external judge.
//!
//! The judgment itself always comes from a collaborator; this module only
//! attaches the returned score and re-sorts.

use crate::config::RERANK_DELAY;
use crate::error::{Result, SearchError};
use crate::fusion::FusionRecord;
use crate::index::DocId;
use crate::llm::{strip_code_fences, TextCompleter};
use anyhow::Context;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Scores (query, passage) pairs, higher is more relevant.
pub trait CrossEncoder: Send + Sync {
    fn score_pairs(&self, pairs: &[(String, String)]) -> anyhow::Result<Vec<f32>>;
}

/// Pacing between sequential collaborator calls.
pub trait Throttle: Send + Sync {
    fn pause(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    fn default() -> Self {
        FixedDelay(RERANK_DELAY)
    }
}

impl Throttle for FixedDelay {
    fn pause(&self) {
        std::thread::sleep(self.0);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Throttle for NoDelay {
    fn pause(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankMethod {
    /// One 0-10 rating call per candidate.
    Individual,
    /// One call returning the candidate ids in relevance order.
    Batch,
    CrossEncoder,
}

impl RerankMethod {
    fn name(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Batch => "batch",
            Self::CrossEncoder => "cross_encoder",
        }
    }

    /// Display line for a `rerank_score` this method produced.
    pub fn score_label(self, score: f32) -> String {
        match self {
            Self::Individual => format!("Rerank Score: {score:.3}/10"),
            // batch stores a 1-based rank
            Self::Batch => format!("Rerank Rank: {}", score as usize),
            Self::CrossEncoder => format!("Cross Encoder Score: {score:.3}"),
        }
    }
}

impl fmt::Display for RerankMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RerankMethod {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "individual" => Ok(Self::Individual),
            "batch" => Ok(Self::Batch),
            "cross_encoder" | "cross-encoder" => Ok(Self::CrossEncoder),
            other => Err(format!("unknown rerank method {other:?}, expected individual|batch|cross_encoder")),
        }
    }
}

fn passage(rec: &FusionRecord) -> String {
    format!("{} - {}", rec.document.title, rec.document.description)
}

fn individual_prompt(query: &str, rec: &FusionRecord) -> String {
    format!(
        r#"Rate how well this movie matches the search query.

Query: "{query}"
Movie: {}

Consider:
- Direct relevance to query
- User intent (what they're looking for)
- Content appropriateness

Rate 0-10 (10 = perfect match).
Give me ONLY the number in your response, no other text or explanation.

Score:"#,
        passage(rec)
    )
}

fn batch_prompt(query: &str, candidates: &[FusionRecord]) -> String {
    let movies: Vec<String> = candidates
        .iter()
        .map(|rec| format!("{{\"id\": {}, \"title\": {:?}, \"description\": {:?}}}", rec.id(), rec.document.title, rec.document.description))
        .collect();
    format!(
        r#"Rank these movies by relevance to the search query.

Query: "{query}"

Movies:
{}

Return ONLY the IDs in order of relevance (best match first). Return a valid JSON list, nothing else. For example:

[75, 12, 34, 2, 1]
"#,
        movies.join("\n")
    )
}

#[derive(Clone)]
pub struct Reranker {
    completer: Option<Arc<dyn TextCompleter>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    throttle: Arc<dyn Throttle>,
}

impl Default for Reranker {
    fn default() -> Self {
        Self { completer: None, cross_encoder: None, throttle: Arc::new(FixedDelay::default()) }
    }
}

impl Reranker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completer(mut self, completer: Arc<dyn TextCompleter>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub fn with_cross_encoder(mut self, cross_encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(cross_encoder);
        self
    }

    pub fn with_throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    fn completer(&self, method: RerankMethod) -> Result<&dyn TextCompleter> {
        self.completer
            .as_deref()
            .ok_or(SearchError::MissingCollaborator { method: method.name(), collaborator: "text completion" })
    }

    /// Attach a rerank score to every candidate, re-sort, and keep the top `limit`.
    pub fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<FusionRecord>,
        method: RerankMethod,
        limit: usize,
    ) -> Result<Vec<FusionRecord>> {
        tracing::info!(%method, candidates = candidates.len(), "reranking");
        match method {
            RerankMethod::Individual => {
                let completer = self.completer(method)?;
                for (i, rec) in candidates.iter_mut().enumerate() {
                    if i > 0 {
                        self.throttle.pause();
                    }
                    let reply = completer.complete_text(&individual_prompt(query, rec))?;
                    let score: f32 = reply
                        .trim()
                        .parse()
                        .with_context(|| format!("rerank score for document {} is not a number: {reply:?}", rec.id()))?;
                    rec.rerank_score = Some(score);
                }
                sort_descending(&mut candidates);
            }
            RerankMethod::Batch => {
                let completer = self.completer(method)?;
                let reply = completer.complete_text(&batch_prompt(query, &candidates))?;
                let order: Vec<DocId> = serde_json::from_str(&strip_code_fences(&reply))
                    .with_context(|| format!("batch rerank reply is not a JSON id list: {reply:?}"))?;
                let mut positions: HashMap<DocId, usize> = HashMap::with_capacity(order.len());
                for (i, id) in order.into_iter().enumerate() {
                    positions.entry(id).or_insert(i + 1);
                }
                for rec in &mut candidates {
                    rec.rerank_score = positions.get(&rec.id()).map(|&p| p as f32);
                }
                // ascending rank; candidates the judge left out keep fused order at the end
                candidates.sort_by(|a, b| match (a.rerank_score, b.rerank_score) {
                    (Some(x), Some(y)) => x.total_cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                });
            }
            RerankMethod::CrossEncoder => {
                let encoder = self.cross_encoder.as_deref().ok_or(SearchError::MissingCollaborator {
                    method: method.name(),
                    collaborator: "cross-encoder",
                })?;
                let pairs: Vec<(String, String)> = candidates.iter().map(|rec| (query.to_string(), passage(rec))).collect();
                let scores = encoder.score_pairs(&pairs)?;
                if scores.len() != candidates.len() {
                    return Err(anyhow::anyhow!(
                        "cross-encoder returned {} scores for {} candidates",
                        scores.len(),
                        candidates.len()
                    )
                    .into());
                }
                for (rec, score) in candidates.iter_mut().zip(scores) {
                    rec.rerank_score = Some(score);
                }
                sort_descending(&mut candidates);
            }
        }
        candidates.truncate(limit);
        Ok(candidates)
    }
}

fn sort_descending(candidates: &mut [FusionRecord]) {
    candidates.sort_by(|a, b| {
        let (x, y) = (a.rerank_score.unwrap_or(f32::MIN), b.rerank_score.unwrap_or(f32::MIN));
        y.total_cmp(&x)
    });
}
