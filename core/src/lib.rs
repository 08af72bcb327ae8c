//! Hybrid movie search: BM25 over an inverted index, embedding similarity,
//! and fusion of the two rankings.

pub mod config;
pub mod error;
pub mod fusion;
pub mod hybrid;
mod index;
pub mod llm;
pub mod persist;
#[cfg(feature = "remote")]
pub mod remote;
pub mod rerank;
pub mod tokenizer;
pub mod vector;

pub use config::{Bm25Params, SearchConfig};
pub use error::{Result, SearchError};
pub use fusion::FusionRecord;
pub use hybrid::HybridSearch;
pub use index::{DocId, Document, InvertedIndex, ScoredDocument};
pub use persist::IndexPaths;
pub use vector::{Embedder, RetrievalStrategy};
