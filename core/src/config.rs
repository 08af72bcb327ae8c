//! Search defaults and the configuration passed into indexes and adapters.

use crate::persist::IndexPaths;
use crate::vector::RetrievalStrategy;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_ALPHA: f32 = 0.5;
pub const RRF_K: u32 = 60;

/// Term frequency saturation.
pub const BM25_K1: f32 = 1.5;
/// Document length normalization strength.
pub const BM25_B: f32 = 0.75;

/// Word-based chunking defaults.
pub const DEFAULT_CHUNK_SIZE: usize = 200;
pub const DEFAULT_CHUNK_OVERLAP: usize = 0;

/// Sentence-based chunking defaults used by chunked retrieval.
pub const DEFAULT_SENTENCE_CHUNK_SIZE: usize = 4;
pub const DEFAULT_SENTENCE_CHUNK_OVERLAP: usize = 1;

/// Each retrieval side is asked for this many times the requested limit before fusion.
pub const SIDE_CANDIDATE_MULTIPLIER: usize = 500;
/// Fused candidate window is widened by this factor when a rerank pass follows.
pub const RERANK_WINDOW_MULTIPLIER: usize = 5;
pub const RERANK_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: BM25_K1, b: BM25_B }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub cache_dir: PathBuf,
    pub bm25: Bm25Params,
    pub strategy: RetrievalStrategy,
    pub side_candidate_multiplier: usize,
    pub rerank_window_multiplier: usize,
}

impl SearchConfig {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            bm25: Bm25Params::default(),
            strategy: RetrievalStrategy::default(),
            side_candidate_multiplier: SIDE_CANDIDATE_MULTIPLIER,
            rerank_window_multiplier: RERANK_WINDOW_MULTIPLIER,
        }
    }

    pub fn with_strategy(mut self, strategy: RetrievalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_bm25(mut self, bm25: Bm25Params) -> Self {
        self.bm25 = bm25;
        self
    }

    pub fn paths(&self) -> IndexPaths {
        IndexPaths::new(&self.cache_dir)
    }
}
