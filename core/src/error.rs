//! Error taxonomy for the retrieval core.
//!
//! Precondition failures surface immediately; collaborator failures are carried
//! through unchanged in [`SearchError::Collaborator`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// A term-level lookup was given text that does not tokenize to exactly one token.
    #[error("term {term:?} must tokenize to exactly one token, got {tokens}")]
    InvalidTerm { term: String, tokens: usize },
    #[error("statistic requires a non-empty corpus")]
    EmptyCorpus,
    #[error("cannot embed empty or whitespace-only text")]
    EmptyInput,
    #[error("no cached snapshot at {}", path.display())]
    CacheMissing { path: PathBuf },
    #[error("invalid fusion input: {0}")]
    InvalidFusionInput(String),
    #[error("chunk overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidChunking { chunk_size: usize, overlap: usize },
    /// A query vector whose length differs from the stored embeddings.
    #[error("query embedding has {actual} dimensions, stored embeddings have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{method} needs a {collaborator} collaborator")]
    MissingCollaborator {
        method: &'static str,
        collaborator: &'static str,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Failure reported by an embedding, completion or cross-encoder service.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;
