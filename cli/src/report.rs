//! Terminal rendering of fused results and image input helpers.

use reelsearch_core::fusion::FusionRecord;
use reelsearch_core::rerank::RerankMethod;
use std::path::Path;

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

fn rank_text(rank: Option<usize>) -> String {
    rank.map_or_else(|| "-".to_string(), |r| (r + 1).to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Printable lines for fused results; rerank scores are labelled by `method`.
pub fn fused_lines(records: &[FusionRecord], method: Option<RerankMethod>) -> Vec<String> {
    let mut lines = Vec::with_capacity(records.len() * 5);
    for (i, rec) in records.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, rec.document.title));
        if let (Some(method), Some(score)) = (method, rec.rerank_score) {
            lines.push(format!("   {}", method.score_label(score)));
        }
        if let Some(grade) = rec.relevance {
            lines.push(format!("   Relevance: {grade}/3"));
        }
        lines.push(format!("   Fused Score: {:.3}", rec.fused_score));
        lines.push(format!("   BM25 Rank: {}, Semantic Rank: {}", rank_text(rec.bm25_rank), rank_text(rec.semantic_rank)));
        lines.push(format!("   {}", truncate(&rec.document.description, 100)));
    }
    lines
}

/// MIME type from the file extension, `image/jpeg` when unknown.
pub fn image_mime_type(path: &Path) -> &'static str {
    mime_guess::from_path(path).first_raw().unwrap_or(DEFAULT_IMAGE_MIME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsearch_core::fusion::rrf_fusion;
    use reelsearch_core::{Document, ScoredDocument};

    fn records() -> Vec<FusionRecord> {
        let docs: Vec<ScoredDocument> = [(1, "Paddington"), (2, "The Revenant")]
            .into_iter()
            .map(|(id, title)| ScoredDocument {
                document: Document { id, title: title.into(), description: "A bear".into() },
                score: 1.0,
            })
            .collect();
        rrf_fusion(&docs, &[], 60, 10).unwrap()
    }

    #[test]
    fn rerank_line_depends_on_method() {
        let mut recs = records();
        recs[0].rerank_score = Some(8.0);
        recs[1].rerank_score = Some(2.0);
        let individual = fused_lines(&recs, Some(RerankMethod::Individual));
        assert_eq!(individual[1], "   Rerank Score: 8.000/10");
        let batch = fused_lines(&recs, Some(RerankMethod::Batch));
        assert!(batch.contains(&"   Rerank Rank: 2".to_string()));
        let cross = fused_lines(&recs, Some(RerankMethod::CrossEncoder));
        assert_eq!(cross[1], "   Cross Encoder Score: 8.000");
    }

    #[test]
    fn plain_results_have_no_rerank_line() {
        let lines = fused_lines(&records(), None);
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[2], "   BM25 Rank: 1, Semantic Rank: -");
    }

    #[test]
    fn relevance_grade_is_shown() {
        let mut recs = records();
        recs[0].relevance = Some(3);
        assert_eq!(fused_lines(&recs, None)[1], "   Relevance: 3/3");
    }

    #[test]
    fn image_mime_falls_back_to_jpeg() {
        assert_eq!(image_mime_type(Path::new("poster.png")), "image/png");
        assert_eq!(image_mime_type(Path::new("poster.JPG")), "image/jpeg");
        assert_eq!(image_mime_type(Path::new("poster")), "image/jpeg");
    }
}
