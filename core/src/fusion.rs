//! Merging lexical and semantic rankings.
//!
//! - **Weighted**: min-max normalize each side, blend with `alpha`
//! - **RRF**: sum `1 / (k + rank)` over the sides a document appears in
//!
//! Both take the BM25 list first; when scores tie, the earlier-seen document wins.

use crate::error::{Result, SearchError};
use crate::index::{DocId, Document, ScoredDocument};
use std::collections::{HashMap, HashSet};

/// Per-candidate accumulator, built fresh for every query.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionRecord {
    pub document: Document,
    /// 0-based position in the BM25 list, if the document was retrieved there.
    pub bm25_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
    pub bm25_score: Option<f32>,
    pub semantic_score: Option<f32>,
    pub bm25_contribution: f32,
    pub semantic_contribution: f32,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
    /// 0-3 grade from the relevance judge.
    pub relevance: Option<u8>,
}

impl FusionRecord {
    fn new(document: Document) -> Self {
        Self {
            document,
            bm25_rank: None,
            semantic_rank: None,
            bm25_score: None,
            semantic_score: None,
            bm25_contribution: 0.0,
            semantic_contribution: 0.0,
            fused_score: 0.0,
            rerank_score: None,
            relevance: None,
        }
    }

    pub fn id(&self) -> DocId {
        self.document.id
    }
}

/// Min-max normalize to `[0, 1]`. A list of equal scores normalizes to all 1.0.
pub fn normalize(scores: &[f32]) -> Vec<f32> {
    let Some((min, max)) = min_max(scores) else {
        return Vec::new();
    };
    let range = max - min;
    if range == 0.0 {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

fn min_max(scores: &[f32]) -> Option<(f32, f32)> {
    let mut iter = scores.iter().copied();
    let first = iter.next()?;
    Some(iter.fold((first, first), |(lo, hi), s| (lo.min(s), hi.max(s))))
}

/// RRF contribution of a 0-based rank.
pub fn rrf_score(rank: usize, k: u32) -> f32 {
    1.0 / (k as f32 + rank as f32)
}

fn check_lists(bm25: &[ScoredDocument], semantic: &[ScoredDocument]) -> Result<()> {
    if bm25.is_empty() && semantic.is_empty() {
        return Err(SearchError::InvalidFusionInput("both ranked lists are empty".into()));
    }
    for (side, list) in [("bm25", bm25), ("semantic", semantic)] {
        let mut seen = HashSet::with_capacity(list.len());
        if let Some(dup) = list.iter().find(|hit| !seen.insert(hit.document.id)) {
            return Err(SearchError::InvalidFusionInput(format!(
                "document {} appears twice in the {side} list",
                dup.document.id
            )));
        }
    }
    Ok(())
}

/// Records in first-seen order, BM25 side first.
struct Accumulator {
    records: Vec<FusionRecord>,
    slots: HashMap<DocId, usize>,
}

impl Accumulator {
    fn with_capacity(n: usize) -> Self {
        Self { records: Vec::with_capacity(n), slots: HashMap::with_capacity(n) }
    }

    fn entry(&mut self, document: &Document) -> &mut FusionRecord {
        let idx = match self.slots.get(&document.id) {
            Some(&idx) => idx,
            None => {
                self.records.push(FusionRecord::new(document.clone()));
                self.slots.insert(document.id, self.records.len() - 1);
                self.records.len() - 1
            }
        };
        &mut self.records[idx]
    }
}

pub fn weighted_fusion(
    bm25: &[ScoredDocument],
    semantic: &[ScoredDocument],
    alpha: f32,
    limit: usize,
) -> Result<Vec<FusionRecord>> {
    check_lists(bm25, semantic)?;
    if !(0.0..=1.0).contains(&alpha) {
        return Err(SearchError::InvalidFusionInput(format!("alpha {alpha} is outside [0, 1]")));
    }
    let bm25_norm = normalize(&bm25.iter().map(|h| h.score).collect::<Vec<_>>());
    let semantic_norm = normalize(&semantic.iter().map(|h| h.score).collect::<Vec<_>>());

    let mut acc = Accumulator::with_capacity(bm25.len() + semantic.len());
    for (rank, (hit, norm)) in bm25.iter().zip(bm25_norm).enumerate() {
        let rec = acc.entry(&hit.document);
        rec.bm25_rank = Some(rank);
        rec.bm25_score = Some(hit.score);
        rec.bm25_contribution = alpha * norm;
    }
    for (rank, (hit, norm)) in semantic.iter().zip(semantic_norm).enumerate() {
        let rec = acc.entry(&hit.document);
        rec.semantic_rank = Some(rank);
        rec.semantic_score = Some(hit.score);
        rec.semantic_contribution = (1.0 - alpha) * norm;
    }

    let mut records = acc.records;
    for rec in &mut records {
        rec.fused_score = rec.bm25_contribution + rec.semantic_contribution;
    }
    // Equal blends fall back to the best rank on a side that carries weight, so
    // alpha = 1 or 0 reproduces that side's ranking exactly.
    let tie_rank = |rec: &FusionRecord| {
        let lexical = if alpha > 0.0 { rec.bm25_rank } else { None };
        let semantic = if alpha < 1.0 { rec.semantic_rank } else { None };
        lexical.into_iter().chain(semantic).min().unwrap_or(usize::MAX)
    };
    records.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score).then(tie_rank(a).cmp(&tie_rank(b))));
    records.truncate(limit);
    Ok(records)
}

pub fn rrf_fusion(
    bm25: &[ScoredDocument],
    semantic: &[ScoredDocument],
    k: u32,
    limit: usize,
) -> Result<Vec<FusionRecord>> {
    check_lists(bm25, semantic)?;
    if k == 0 {
        return Err(SearchError::InvalidFusionInput("rrf k must be positive".into()));
    }

    let mut acc = Accumulator::with_capacity(bm25.len() + semantic.len());
    for (rank, hit) in bm25.iter().enumerate() {
        let rec = acc.entry(&hit.document);
        rec.bm25_rank = Some(rank);
        rec.bm25_score = Some(hit.score);
        rec.bm25_contribution = rrf_score(rank, k);
    }
    for (rank, hit) in semantic.iter().enumerate() {
        let rec = acc.entry(&hit.document);
        rec.semantic_rank = Some(rank);
        rec.semantic_score = Some(hit.score);
        rec.semantic_contribution = rrf_score(rank, k);
    }

    let mut records = acc.records;
    for rec in &mut records {
        rec.fused_score = rec.bm25_contribution + rec.semantic_contribution;
    }
    // stable: ties keep insertion order
    records.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
    records.truncate(limit);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: DocId, score: f32) -> ScoredDocument {
        ScoredDocument { document: Document { id, title: format!("doc {id}"), description: String::new() }, score }
    }

    fn ids(records: &[FusionRecord]) -> Vec<DocId> {
        records.iter().map(FusionRecord::id).collect()
    }

    #[test]
    fn normalize_constant_list_is_all_ones() {
        assert_eq!(normalize(&[5.0, 5.0, 5.0]), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn normalize_spreads_to_unit_interval() {
        assert_eq!(normalize(&[1.0, 2.0, 3.0]), vec![0.0, 0.5, 1.0]);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn rrf_score_strictly_decreases_with_rank() {
        for k in [1, 60, 1000] {
            for r in 0..100 {
                assert!(rrf_score(r, k) > rrf_score(r + 1, k));
            }
        }
    }

    #[test]
    fn alpha_one_reproduces_bm25_ranking() {
        let bm25 = vec![hit(3, 9.0), hit(1, 4.0), hit(7, 4.0), hit(2, 0.5)];
        let semantic = vec![hit(2, 0.9), hit(8, 0.8), hit(1, 0.1)];
        let fused = weighted_fusion(&bm25, &semantic, 1.0, 4).unwrap();
        assert_eq!(ids(&fused), vec![3, 1, 7, 2]);
        assert!(fused.iter().all(|r| r.semantic_contribution == 0.0));
    }

    #[test]
    fn alpha_zero_reproduces_semantic_ranking() {
        let bm25 = vec![hit(3, 9.0), hit(1, 4.0), hit(2, 0.5)];
        let semantic = vec![hit(2, 0.9), hit(8, 0.8), hit(1, 0.1)];
        let fused = weighted_fusion(&bm25, &semantic, 0.0, 3).unwrap();
        assert_eq!(ids(&fused), vec![2, 8, 1]);
    }

    #[test]
    fn weighted_blend_sums_both_sides() {
        let bm25 = vec![hit(1, 10.0), hit(2, 0.0)];
        let semantic = vec![hit(2, 0.8), hit(3, 0.2)];
        let fused = weighted_fusion(&bm25, &semantic, 0.5, 10).unwrap();
        let two = fused.iter().find(|r| r.id() == 2).unwrap();
        assert_eq!(two.bm25_rank, Some(1));
        assert_eq!(two.semantic_rank, Some(0));
        assert!((two.fused_score - 0.5).abs() < 1e-6);
        let three = fused.iter().find(|r| r.id() == 3).unwrap();
        assert_eq!(three.bm25_rank, None);
        assert_eq!(three.fused_score, 0.0);
    }

    #[test]
    fn rrf_rewards_agreement_between_sides() {
        // A leads lexically only; B is first semantically and second lexically
        let bm25 = vec![hit(1, 8.0), hit(2, 6.0)];
        let semantic = vec![hit(2, 0.7)];
        let fused = rrf_fusion(&bm25, &semantic, 60, 2).unwrap();
        assert_eq!(ids(&fused), vec![2, 1]);
        assert!((fused[0].fused_score - (1.0 / 60.0 + 1.0 / 61.0)).abs() < 1e-7);
        assert!((fused[1].fused_score - 1.0 / 60.0).abs() < 1e-7);
    }

    #[test]
    fn rrf_ties_keep_first_seen_order() {
        let bm25 = vec![hit(5, 1.0)];
        let semantic = vec![hit(4, 1.0)];
        let fused = rrf_fusion(&bm25, &semantic, 60, 10).unwrap();
        assert_eq!(ids(&fused), vec![5, 4]);
    }

    #[test]
    fn fusion_rejects_empty_or_duplicated_input() {
        assert!(matches!(rrf_fusion(&[], &[], 60, 5), Err(SearchError::InvalidFusionInput(_))));
        assert!(matches!(weighted_fusion(&[], &[], 0.5, 5), Err(SearchError::InvalidFusionInput(_))));
        let dup = vec![hit(1, 1.0), hit(1, 0.5)];
        assert!(matches!(rrf_fusion(&dup, &[], 60, 5), Err(SearchError::InvalidFusionInput(_))));
        assert!(matches!(weighted_fusion(&[hit(1, 1.0)], &[], 1.5, 5), Err(SearchError::InvalidFusionInput(_))));
    }

    #[test]
    fn one_sided_input_is_accepted() {
        let fused = rrf_fusion(&[], &[hit(1, 0.3), hit(2, 0.2)], 60, 10).unwrap();
        assert_eq!(ids(&fused), vec![1, 2]);
    }
}
