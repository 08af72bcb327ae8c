//! Retrieval quality against a golden dataset, matched by title.

use crate::corpus::GoldenDataset;
use anyhow::Result;
use reelsearch_core::config::RRF_K;
use reelsearch_core::HybridSearch;
use serde::Serialize;
use std::collections::HashSet;

fn hits_in_top_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> usize {
    retrieved.iter().take(k).filter(|title| relevant.contains(*title)).count()
}

/// Relevant titles among the first `k` retrieved, divided by `k`.
pub fn precision_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_in_top_k(retrieved, relevant, k) as f64 / k as f64
}

/// Relevant titles among the first `k` retrieved, divided by the number of relevant titles.
pub fn recall_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_in_top_k(retrieved, relevant, k) as f64 / relevant.len() as f64
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub query: String,
    pub precision: f64,
    pub recall: f64,
    pub retrieved: Vec<String>,
    pub relevant: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub limit: usize,
    pub results: Vec<QueryReport>,
}

impl EvaluationReport {
    pub fn mean_precision(&self) -> f64 {
        mean(self.results.iter().map(|r| r.precision))
    }

    pub fn mean_recall(&self) -> f64 {
        mean(self.results.iter().map(|r| r.recall))
    }
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Run RRF search for every test case and score the top `limit` titles.
pub fn evaluate(engine: &HybridSearch, golden: &GoldenDataset, limit: usize) -> Result<EvaluationReport> {
    let mut results = Vec::with_capacity(golden.test_cases.len());
    for case in &golden.test_cases {
        let hits = engine.rrf_search(&case.query, RRF_K, limit, None)?;
        let retrieved: Vec<String> = hits
            .into_iter()
            .map(|rec| rec.document.title)
            .filter(|t| !t.is_empty())
            .collect();
        let relevant: HashSet<String> = case.relevant_docs.iter().cloned().collect();
        let precision = precision_at_k(&retrieved, &relevant, limit);
        let recall = recall_at_k(&retrieved, &relevant, limit);
        tracing::debug!(query = %case.query, precision, recall, "evaluated query");
        results.push(QueryReport {
            query: case.query.clone(),
            precision,
            recall,
            retrieved: retrieved.into_iter().take(limit).collect(),
            relevant: case.relevant_docs.clone(),
        });
    }
    Ok(EvaluationReport { limit, results })
}
