use crate::config::Bm25Params;
use crate::error::{Result, SearchError};
use crate::tokenizer::Tokenizer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

pub type DocId = u32;

/// A corpus record. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Document {
    /// Text the lexical index tokenizes.
    pub fn indexed_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// A document paired with the score one retrieval side gave it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Inverted index with the per-document statistics BM25 needs.
///
/// A document id is in `postings[t]` iff `t` occurs in that document's indexed text.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InvertedIndex {
    pub postings: HashMap<String, BTreeSet<DocId>>,
    pub docmap: HashMap<DocId, Document>,
    pub term_frequencies: HashMap<DocId, HashMap<String, u32>>,
    pub doc_lengths: HashMap<DocId, u32>,
    tokenizer: Tokenizer,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    pub fn with_tokenizer(tokenizer: Tokenizer) -> Self {
        Self { tokenizer, ..Self::default() }
    }

    pub(crate) fn from_tables(
        postings: HashMap<String, BTreeSet<DocId>>,
        docmap: HashMap<DocId, Document>,
        term_frequencies: HashMap<DocId, HashMap<String, u32>>,
        doc_lengths: HashMap<DocId, u32>,
        tokenizer: Tokenizer,
    ) -> Self {
        Self { postings, docmap, term_frequencies, doc_lengths, tokenizer }
    }

    pub fn tokenizer(&self) -> &Tokenizer { &self.tokenizer }

    pub fn num_docs(&self) -> usize { self.docmap.len() }

    /// Replace all state with an index over `corpus`.
    pub fn build(&mut self, corpus: &[Document]) {
        self.postings.clear();
        self.docmap.clear();
        self.term_frequencies.clear();
        self.doc_lengths.clear();
        for doc in corpus {
            self.add_document(doc);
        }
        tracing::info!(num_docs = self.docmap.len(), num_terms = self.postings.len(), "built inverted index");
    }

    fn add_document(&mut self, doc: &Document) {
        let tokens = self.tokenizer.tokenize(&doc.indexed_text());
        self.doc_lengths.insert(doc.id, tokens.len() as u32);
        let mut tf_counts: HashMap<String, u32> = HashMap::new();
        let mut seen_in_doc: HashSet<&str> = HashSet::new();
        for term in &tokens {
            *tf_counts.entry(term.clone()).or_insert(0) += 1;
            if seen_in_doc.insert(term) {
                self.postings.entry(term.clone()).or_default().insert(doc.id);
            }
        }
        self.term_frequencies.insert(doc.id, tf_counts);
        self.docmap.insert(doc.id, doc.clone());
    }

    /// Sorted ids of the documents containing `term`.
    pub fn get_documents(&self, term: &str) -> Result<Vec<DocId>> {
        let token = self.tokenizer.single_token(term)?;
        Ok(self.postings.get(&token).map(|ids| ids.iter().copied().collect()).unwrap_or_default())
    }

    pub fn term_frequency(&self, doc_id: DocId, term: &str) -> Result<u32> {
        let token = self.tokenizer.single_token(term)?;
        Ok(self.token_frequency(doc_id, &token))
    }

    fn token_frequency(&self, doc_id: DocId, token: &str) -> u32 {
        self.term_frequencies
            .get(&doc_id)
            .and_then(|counts| counts.get(token))
            .copied()
            .unwrap_or(0)
    }

    fn document_frequency(&self, token: &str) -> usize {
        self.postings.get(token).map_or(0, BTreeSet::len)
    }

    /// Classic IDF: `ln((N + 1) / (df + 1))`.
    pub fn inverse_document_frequency(&self, term: &str) -> Result<f32> {
        let token = self.tokenizer.single_token(term)?;
        let n = self.num_docs() as f32;
        let df = self.document_frequency(&token) as f32;
        Ok(((n + 1.0) / (df + 1.0)).ln())
    }

    pub fn tf_idf(&self, doc_id: DocId, term: &str) -> Result<f32> {
        let tf = self.term_frequency(doc_id, term)? as f32;
        Ok(tf * self.inverse_document_frequency(term)?)
    }

    /// Okapi IDF: `ln((N - df + 0.5) / (df + 0.5) + 1)`.
    pub fn bm25_inverse_document_frequency(&self, term: &str) -> Result<f32> {
        let token = self.tokenizer.single_token(term)?;
        Ok(self.token_bm25_idf(&token))
    }

    fn token_bm25_idf(&self, token: &str) -> f32 {
        let n = self.num_docs() as f32;
        let df = self.document_frequency(token) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    pub fn average_doc_length(&self) -> Result<f32> {
        if self.doc_lengths.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }
        let total: u64 = self.doc_lengths.values().map(|&l| l as u64).sum();
        Ok(total as f32 / self.doc_lengths.len() as f32)
    }

    /// Saturated, length-normalized term frequency component of BM25.
    pub fn bm25_term_score(&self, doc_id: DocId, term: &str, params: Bm25Params) -> Result<f32> {
        let token = self.tokenizer.single_token(term)?;
        let avgdl = self.average_doc_length()?;
        Ok(self.token_bm25_tf(doc_id, &token, params, avgdl))
    }

    fn token_bm25_tf(&self, doc_id: DocId, token: &str, params: Bm25Params, avgdl: f32) -> f32 {
        let tf = self.token_frequency(doc_id, token) as f32;
        let dl = self.doc_lengths.get(&doc_id).copied().unwrap_or(0) as f32;
        let Bm25Params { k1, b } = params;
        let norm = if avgdl > 0.0 { dl / avgdl } else { 0.0 };
        (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * norm))
    }

    pub fn bm25_score(&self, doc_id: DocId, term: &str, params: Bm25Params) -> Result<f32> {
        Ok(self.bm25_term_score(doc_id, term, params)? * self.bm25_inverse_document_frequency(term)?)
    }

    /// Rank documents by summed BM25 over the query tokens.
    ///
    /// Only documents present in some posting list are scored. Ties go to the
    /// lower document id.
    pub fn bm25_search(&self, query: &str, limit: usize, params: Bm25Params) -> Result<Vec<ScoredDocument>> {
        let q_tokens = self.tokenizer.tokenize(query);
        if q_tokens.is_empty() || self.docmap.is_empty() {
            return Ok(Vec::new());
        }
        let avgdl = self.average_doc_length()?;

        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for token in &q_tokens {
            let Some(doc_ids) = self.postings.get(token) else { continue };
            let idf = self.token_bm25_idf(token);
            for &doc_id in doc_ids {
                *scores.entry(doc_id).or_insert(0.0) += self.token_bm25_tf(doc_id, token, params, avgdl) * idf;
            }
        }

        let mut scored: Vec<(DocId, f32)> = scores.into_iter().collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(scored
            .into_iter()
            .take(limit)
            .filter_map(|(doc_id, score)| {
                self.docmap.get(&doc_id).map(|doc| ScoredDocument { document: doc.clone(), score })
            })
            .collect())
    }
}
