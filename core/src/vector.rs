//! Dense-vector retrieval over an external embedding service.
//!
//! Two strategies share one scoring routine: whole-document vectors, and
//! sentence chunks where a document scores as its best-matching chunk.

use crate::config::{DEFAULT_SENTENCE_CHUNK_OVERLAP, DEFAULT_SENTENCE_CHUNK_SIZE};
use crate::error::{Result, SearchError};
use crate::index::{Document, ScoredDocument};
use crate::persist::{read_bincode, read_json, write_bincode, write_json, IndexPaths};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::create_dir_all;
use std::sync::Arc;

lazy_static! {
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]+(?:\s+|$)").expect("valid regex");
}

/// Text embedding service.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalStrategy {
    #[default]
    Document,
    /// Sentence windows of `chunk_size` with `overlap` sentences shared between neighbours.
    Chunked { chunk_size: usize, overlap: usize },
}

impl RetrievalStrategy {
    pub fn chunked() -> Self {
        RetrievalStrategy::Chunked {
            chunk_size: DEFAULT_SENTENCE_CHUNK_SIZE,
            overlap: DEFAULT_SENTENCE_CHUNK_OVERLAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Position of the owning document in the corpus.
    pub movie_index: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Cosine similarity over equal-length vectors; 0 when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Split at `.`, `!` or `?` followed by whitespace or end of text.
pub fn split_sentences(text: &str) -> Vec<String> {
    let text = text.trim();
    let mut sentences = Vec::new();
    let mut last_end = 0;
    for mat in SENTENCE_END.find_iter(text) {
        let sentence = text[last_end..mat.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        last_end = mat.end();
    }
    let tail = text[last_end..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn check_window(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(SearchError::InvalidChunking { chunk_size, overlap });
    }
    Ok(())
}

/// Group units into windows of `size`, each starting `size - overlap` after the last.
///
/// A trailing window holding only overlap is dropped.
fn windows(units: &[String], size: usize, overlap: usize, sep: &str) -> Vec<String> {
    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < units.len() {
        let end = (start + size).min(units.len());
        if !chunks.is_empty() && end - start <= overlap {
            break;
        }
        chunks.push(units[start..end].join(sep));
        start += step;
    }
    chunks
}

pub fn chunk_sentences(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    check_window(chunk_size, overlap)?;
    Ok(windows(&split_sentences(text), chunk_size, overlap, " "))
}

/// Fixed-size chunks of whitespace-separated words.
pub fn chunk_words(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    check_window(chunk_size, overlap)?;
    let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    Ok(windows(&words, chunk_size, overlap, " "))
}

/// Embedded corpus, ready for nearest-neighbour scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticIndex {
    pub documents: Vec<Document>,
    pub embeddings: Vec<Vec<f32>>,
    /// One entry per embedding in chunked mode; empty in document mode.
    pub chunks: Vec<ChunkMetadata>,
}

impl SemanticIndex {
    /// Top `limit` documents for an already-embedded query, ties in corpus order.
    pub fn search_vector(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredDocument>> {
        if let Some(stored) = self.embeddings.iter().find(|e| e.len() != query.len()) {
            return Err(SearchError::DimensionMismatch { expected: stored.len(), actual: query.len() });
        }
        let similarities: Vec<f32> = self.embeddings.iter().map(|e| cosine_similarity(query, e)).collect();

        let mut best: Vec<Option<f32>> = vec![None; self.documents.len()];
        if self.chunks.is_empty() {
            for (i, s) in similarities.into_iter().enumerate().take(best.len()) {
                best[i] = Some(s);
            }
        } else {
            for (meta, s) in self.chunks.iter().zip(similarities) {
                let Some(slot) = best.get_mut(meta.movie_index) else { continue };
                *slot = Some(slot.map_or(s, |cur| cur.max(s)));
            }
        }

        let mut scored: Vec<(usize, f32)> = best
            .into_iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|s| (i, s)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(i, score)| ScoredDocument { document: self.documents[i].clone(), score })
            .collect())
    }
}

/// Embedding adapter: builds, caches and queries a [`SemanticIndex`].
#[derive(Clone)]
pub struct SemanticSearch {
    embedder: Arc<dyn Embedder>,
    strategy: RetrievalStrategy,
    paths: IndexPaths,
}

impl SemanticSearch {
    pub fn new(embedder: Arc<dyn Embedder>, strategy: RetrievalStrategy, paths: IndexPaths) -> Self {
        Self { embedder, strategy, paths }
    }

    pub fn strategy(&self) -> RetrievalStrategy { self.strategy }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(SearchError::EmptyInput);
        }
        Ok(self.embedder.embed(text)?)
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(SearchError::EmptyInput);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.embedder.embed_batch(texts)?)
    }

    /// Embed the corpus without touching the cache.
    pub fn embed_corpus(&self, documents: &[Document]) -> Result<SemanticIndex> {
        let index = match self.strategy {
            RetrievalStrategy::Document => {
                let texts: Vec<String> = documents.iter().map(|d| format!("{}: {}", d.title, d.description)).collect();
                SemanticIndex { documents: documents.to_vec(), embeddings: self.embed_batch(&texts)?, chunks: Vec::new() }
            }
            RetrievalStrategy::Chunked { chunk_size, overlap } => {
                let mut texts = Vec::new();
                let mut chunks = Vec::new();
                for (movie_index, doc) in documents.iter().enumerate() {
                    let doc_chunks = chunk_sentences(&doc.description, chunk_size, overlap)?;
                    let total_chunks = doc_chunks.len();
                    for (chunk_index, text) in doc_chunks.into_iter().enumerate() {
                        texts.push(text);
                        chunks.push(ChunkMetadata { movie_index, chunk_index, total_chunks });
                    }
                }
                SemanticIndex { documents: documents.to_vec(), embeddings: self.embed_batch(&texts)?, chunks }
            }
        };
        tracing::info!(
            num_docs = index.documents.len(),
            num_vectors = index.embeddings.len(),
            strategy = ?self.strategy,
            "built embeddings"
        );
        Ok(index)
    }

    /// Embed the corpus and write the cache.
    pub fn build(&self, documents: &[Document]) -> Result<SemanticIndex> {
        let index = self.embed_corpus(documents)?;
        self.save(&index)?;
        Ok(index)
    }

    fn save(&self, index: &SemanticIndex) -> Result<()> {
        create_dir_all(&self.paths.root)?;
        match self.strategy {
            RetrievalStrategy::Document => write_bincode(&self.paths.document_embeddings(), &index.embeddings)?,
            RetrievalStrategy::Chunked { .. } => {
                write_bincode(&self.paths.chunk_embeddings(), &index.embeddings)?;
                write_json(&self.paths.chunk_metadata(), &index.chunks)?;
            }
        }
        Ok(())
    }

    /// Load cached embeddings for `documents`.
    ///
    /// Document-mode vectors are accepted when their count matches the corpus;
    /// nothing else about the corpus is checked.
    pub fn load(&self, documents: &[Document]) -> Result<SemanticIndex> {
        let (embeddings, chunks): (Vec<Vec<f32>>, Vec<ChunkMetadata>) = match self.strategy {
            RetrievalStrategy::Document => {
                let path = self.paths.document_embeddings();
                if !path.is_file() {
                    return Err(SearchError::CacheMissing { path });
                }
                let embeddings: Vec<Vec<f32>> = read_bincode(&path)?;
                if embeddings.len() != documents.len() {
                    tracing::warn!(cached = embeddings.len(), corpus = documents.len(), "embedding cache size differs from corpus");
                    return Err(SearchError::CacheMissing { path });
                }
                (embeddings, Vec::new())
            }
            RetrievalStrategy::Chunked { .. } => {
                let (vec_path, meta_path) = (self.paths.chunk_embeddings(), self.paths.chunk_metadata());
                if !vec_path.is_file() {
                    return Err(SearchError::CacheMissing { path: vec_path });
                }
                if !meta_path.is_file() {
                    return Err(SearchError::CacheMissing { path: meta_path });
                }
                let embeddings: Vec<Vec<f32>> = read_bincode(&vec_path)?;
                let chunks: Vec<ChunkMetadata> = read_json(&meta_path)?;
                if embeddings.len() != chunks.len() {
                    tracing::warn!(vectors = embeddings.len(), chunks = chunks.len(), "chunk cache is inconsistent");
                    return Err(SearchError::CacheMissing { path: vec_path });
                }
                (embeddings, chunks)
            }
        };
        tracing::info!(num_vectors = embeddings.len(), "loaded cached embeddings");
        Ok(SemanticIndex { documents: documents.to_vec(), embeddings, chunks })
    }

    pub fn load_or_build(&self, documents: &[Document]) -> Result<SemanticIndex> {
        match self.load(documents) {
            Err(SearchError::CacheMissing { path }) => {
                tracing::info!(path = %path.display(), "no usable embedding cache, building");
                self.build(documents)
            }
            other => other,
        }
    }

    pub fn search(&self, index: &SemanticIndex, query: &str, limit: usize) -> Result<Vec<ScoredDocument>> {
        let query_vec = self.embed(query)?;
        index.search_vector(&query_vec, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Counts of a fixed vocabulary, enough to make similarity meaningful.
    struct VocabEmbedder;

    const VOCAB: [&str; 4] = ["bear", "london", "city", "shark"];

    impl Embedder for VocabEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(VOCAB.iter().map(|w| lower.matches(w).count() as f32).collect())
        }
    }

    /// Stands in for a different embedding model than the one that built the cache.
    struct NarrowEmbedder;

    impl Embedder for NarrowEmbedder {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    fn docs() -> Vec<Document> {
        vec![
            Document { id: 1, title: "Paddington".into(), description: "A bear in London. He likes marmalade.".into() },
            Document { id: 2, title: "Jaws".into(), description: "A shark. A beach town. A bear cameo.".into() },
            Document { id: 3, title: "Metropolis".into(), description: "A city of machines.".into() },
        ]
    }

    #[test]
    fn zero_vector_similarity_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        assert_eq!(split_sentences("One. Two!  Three? Four"), vec!["One.", "Two!", "Three?", "Four"]);
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn chunks_overlap_by_requested_sentences() {
        let chunks = chunk_sentences("A. B. C. D. E.", 2, 1).unwrap();
        assert_eq!(chunks, vec!["A. B.", "B. C.", "C. D.", "D. E."]);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        assert!(matches!(chunk_sentences("A. B.", 2, 2), Err(SearchError::InvalidChunking { .. })));
        assert!(matches!(chunk_words("a b", 0, 0), Err(SearchError::InvalidChunking { .. })));
    }

    #[test]
    fn word_chunks_are_fixed_size() {
        let chunks = chunk_words("one two three four five", 2, 0).unwrap();
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn empty_query_is_rejected() {
        let dir = tempdir().unwrap();
        let search = SemanticSearch::new(Arc::new(VocabEmbedder), RetrievalStrategy::Document, IndexPaths::new(dir.path()));
        assert!(matches!(search.embed("  \n"), Err(SearchError::EmptyInput)));
    }

    #[test]
    fn document_mode_ranks_by_similarity() {
        let dir = tempdir().unwrap();
        let search = SemanticSearch::new(Arc::new(VocabEmbedder), RetrievalStrategy::Document, IndexPaths::new(dir.path()));
        let index = search.build(&docs()).unwrap();
        let hits = search.search(&index, "city", 3).unwrap();
        assert_eq!(hits[0].document.id, 3);
        // the other two are orthogonal to the query and keep corpus order
        assert_eq!(hits[1].document.id, 1);
        assert_eq!(hits[2].document.id, 2);
    }

    #[test]
    fn chunked_mode_scores_documents_by_best_chunk() {
        let dir = tempdir().unwrap();
        let strategy = RetrievalStrategy::Chunked { chunk_size: 1, overlap: 0 };
        let search = SemanticSearch::new(Arc::new(VocabEmbedder), strategy, IndexPaths::new(dir.path()));
        let index = search.build(&docs()).unwrap();
        assert_eq!(index.chunks.len(), 2 + 3 + 1);
        assert_eq!(index.chunks[2], ChunkMetadata { movie_index: 1, chunk_index: 0, total_chunks: 3 });

        // Jaws's "A bear cameo." matches exactly; its other chunks do not drag it down
        let hits = search.search(&index, "bear", 3).unwrap();
        let ids: Vec<u32> = hits.iter().map(|h| h.document.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn cache_round_trips_and_detects_size_change() {
        let dir = tempdir().unwrap();
        let search = SemanticSearch::new(Arc::new(VocabEmbedder), RetrievalStrategy::Document, IndexPaths::new(dir.path()));
        assert!(matches!(search.load(&docs()), Err(SearchError::CacheMissing { .. })));
        let built = search.build(&docs()).unwrap();
        assert_eq!(search.load(&docs()).unwrap(), built);
        assert!(matches!(search.load(&docs()[..2]), Err(SearchError::CacheMissing { .. })));
    }

    #[test]
    fn chunk_cache_round_trips_with_metadata() {
        let dir = tempdir().unwrap();
        let strategy = RetrievalStrategy::Chunked { chunk_size: 1, overlap: 0 };
        let search = SemanticSearch::new(Arc::new(VocabEmbedder), strategy, IndexPaths::new(dir.path()));
        let built = search.build(&docs()).unwrap();
        let loaded = search.load(&docs()).unwrap();
        assert_eq!(loaded.chunks, built.chunks);
        assert_eq!(loaded, built);
        assert_eq!(search.search(&loaded, "bear", 1).unwrap()[0].document.id, 2);
    }

    #[test]
    fn chunk_cache_with_one_artifact_missing_is_a_miss() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let strategy = RetrievalStrategy::Chunked { chunk_size: 1, overlap: 0 };
        let search = SemanticSearch::new(Arc::new(VocabEmbedder), strategy, paths.clone());
        search.build(&docs()).unwrap();

        std::fs::remove_file(paths.chunk_metadata()).unwrap();
        match search.load(&docs()) {
            Err(SearchError::CacheMissing { path }) => assert_eq!(path, paths.chunk_metadata()),
            other => panic!("expected a cache miss, got {other:?}"),
        }

        search.build(&docs()).unwrap();
        std::fs::remove_file(paths.chunk_embeddings()).unwrap();
        match search.load(&docs()) {
            Err(SearchError::CacheMissing { path }) => assert_eq!(path, paths.chunk_embeddings()),
            other => panic!("expected a cache miss, got {other:?}"),
        }
    }

    #[test]
    fn chunk_cache_with_count_mismatch_is_a_miss() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let strategy = RetrievalStrategy::Chunked { chunk_size: 1, overlap: 0 };
        let search = SemanticSearch::new(Arc::new(VocabEmbedder), strategy, paths.clone());
        let built = search.build(&docs()).unwrap();

        write_json(&paths.chunk_metadata(), &built.chunks[..built.chunks.len() - 1]).unwrap();
        assert!(matches!(search.load(&docs()), Err(SearchError::CacheMissing { .. })));
        // a miss rebuilds both artifacts
        assert_eq!(search.load_or_build(&docs()).unwrap().chunks.len(), built.chunks.len());
    }

    #[test]
    fn query_dimension_must_match_stored_vectors() {
        let dir = tempdir().unwrap();
        let search = SemanticSearch::new(Arc::new(VocabEmbedder), RetrievalStrategy::Document, IndexPaths::new(dir.path()));
        let index = search.build(&docs()).unwrap();
        assert!(matches!(
            index.search_vector(&[1.0, 0.0], 3),
            Err(SearchError::DimensionMismatch { expected: 4, actual: 2 })
        ));

        let narrow = SemanticSearch::new(Arc::new(NarrowEmbedder), RetrievalStrategy::Document, IndexPaths::new(dir.path()));
        assert!(matches!(
            narrow.search(&index, "bear", 3),
            Err(SearchError::DimensionMismatch { expected: 4, actual: 1 })
        ));
    }
}
