//! Query-time orchestration: lazily loaded indexes on both sides, fusion, and
//! an optional rerank pass.
//!
//! A corpus and the two indexes built from it form one generation. Queries take
//! the current generation once and use it for both sides. A rebuild prepares a
//! complete new generation and swaps the pointer, so concurrent queries see
//! either the old corpus or the new one, never a mix.

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::fusion::{rrf_fusion, weighted_fusion, FusionRecord};
use crate::index::{DocId, Document, InvertedIndex, ScoredDocument};
use crate::llm::{enhance_query, QueryEnhancement, TextCompleter};
use crate::persist::{snapshot_exists, IndexPaths};
use crate::rerank::{RerankMethod, Reranker};
use crate::tokenizer::Tokenizer;
use crate::vector::{Embedder, SemanticIndex, SemanticSearch};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type Slot<T> = RwLock<Option<Arc<T>>>;

fn get_or_init<T>(slot: &Slot<T>, init: impl FnOnce() -> Result<T>) -> Result<Arc<T>> {
    if let Some(ready) = slot.read().as_ref() {
        return Ok(Arc::clone(ready));
    }
    let mut guard = slot.write();
    if let Some(ready) = guard.as_ref() {
        return Ok(Arc::clone(ready));
    }
    let value = Arc::new(init()?);
    *guard = Some(Arc::clone(&value));
    Ok(value)
}

struct Generation {
    documents: Vec<Document>,
    /// Position of each id in `documents`; the first occurrence wins.
    positions: HashMap<DocId, usize>,
    lexical: Slot<InvertedIndex>,
    semantic: Slot<SemanticIndex>,
}

impl Generation {
    fn new(documents: Vec<Document>) -> Self {
        let mut positions = HashMap::with_capacity(documents.len());
        for (i, doc) in documents.iter().enumerate() {
            positions.entry(doc.id).or_insert(i);
        }
        Self { documents, positions, lexical: RwLock::new(None), semantic: RwLock::new(None) }
    }

    fn get(&self, id: DocId) -> Option<&Document> {
        self.positions.get(&id).map(|&i| &self.documents[i])
    }
}

pub struct HybridSearch {
    config: SearchConfig,
    tokenizer: Tokenizer,
    semantic: SemanticSearch,
    current: RwLock<Arc<Generation>>,
    /// Held while anything writes the on-disk caches.
    cache_writer: Mutex<()>,
    reranker: Reranker,
    completer: Option<Arc<dyn TextCompleter>>,
}

impl HybridSearch {
    pub fn new(documents: Vec<Document>, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Self {
        let semantic = SemanticSearch::new(embedder, config.strategy, config.paths());
        Self {
            config,
            tokenizer: Tokenizer::default(),
            semantic,
            current: RwLock::new(Arc::new(Generation::new(documents))),
            cache_writer: Mutex::new(()),
            reranker: Reranker::new(),
            completer: None,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    /// Completion service used for query enhancement.
    pub fn with_completer(mut self, completer: Arc<dyn TextCompleter>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub fn config(&self) -> &SearchConfig { &self.config }

    fn generation(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read())
    }

    fn is_current(&self, gen: &Arc<Generation>) -> bool {
        Arc::ptr_eq(gen, &self.current.read())
    }

    pub fn num_documents(&self) -> usize {
        self.generation().documents.len()
    }

    pub fn document(&self, id: DocId) -> Option<Document> {
        self.generation().get(id).cloned()
    }

    fn paths(&self) -> IndexPaths { self.config.paths() }

    fn index_documents(&self, documents: &[Document]) -> InvertedIndex {
        let mut index = InvertedIndex::with_tokenizer(self.tokenizer.clone());
        index.build(documents);
        index
    }

    fn lexical_in(&self, gen: &Arc<Generation>) -> Result<Arc<InvertedIndex>> {
        get_or_init(&gen.lexical, || {
            let _writer = self.cache_writer.lock();
            let paths = self.paths();
            if !self.is_current(gen) {
                // the cache on disk already belongs to a newer corpus
                return Ok(self.index_documents(&gen.documents));
            }
            if snapshot_exists(&paths) {
                InvertedIndex::load(&paths, self.tokenizer.clone())
            } else {
                tracing::info!(path = %paths.lexical_dir().display(), "no lexical snapshot, building");
                let index = self.index_documents(&gen.documents);
                index.save(&paths)?;
                Ok(index)
            }
        })
    }

    fn semantic_in(&self, gen: &Arc<Generation>) -> Result<Arc<SemanticIndex>> {
        get_or_init(&gen.semantic, || {
            let _writer = self.cache_writer.lock();
            if !self.is_current(gen) {
                return self.semantic.embed_corpus(&gen.documents);
            }
            self.semantic.load_or_build(&gen.documents)
        })
    }

    /// The lexical index, loaded from cache or built and saved on first call.
    pub fn lexical(&self) -> Result<Arc<InvertedIndex>> {
        self.lexical_in(&self.generation())
    }

    pub fn semantic_index(&self) -> Result<Arc<SemanticIndex>> {
        self.semantic_in(&self.generation())
    }

    /// Rebuild both sides from the current corpus and swap them in.
    pub fn rebuild(&self) -> Result<()> {
        let documents = self.generation().documents.clone();
        self.rebuild_with(documents)
    }

    /// Replace the corpus. Both indexes are built and saved before the swap;
    /// queries already running finish against the corpus they started with.
    pub fn rebuild_with(&self, documents: Vec<Document>) -> Result<()> {
        let _writer = self.cache_writer.lock();
        let gen = Generation::new(documents);
        let lexical = self.index_documents(&gen.documents);
        lexical.save(&self.paths())?;
        let semantic = self.semantic.build(&gen.documents)?;
        *gen.lexical.write() = Some(Arc::new(lexical));
        *gen.semantic.write() = Some(Arc::new(semantic));
        tracing::info!(num_docs = gen.documents.len(), "swapped in rebuilt corpus");
        *self.current.write() = Arc::new(gen);
        Ok(())
    }

    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDocument>> {
        self.keyword_in(&self.generation(), query, limit)
    }

    pub fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDocument>> {
        self.semantic_search_in(&self.generation(), query, limit)
    }

    fn keyword_in(&self, gen: &Arc<Generation>, query: &str, limit: usize) -> Result<Vec<ScoredDocument>> {
        self.lexical_in(gen)?.bm25_search(query, limit, self.config.bm25)
    }

    fn semantic_search_in(&self, gen: &Arc<Generation>, query: &str, limit: usize) -> Result<Vec<ScoredDocument>> {
        let index = self.semantic_in(gen)?;
        self.semantic.search(&index, query, limit)
    }

    fn side_limit(&self, limit: usize) -> usize {
        limit.saturating_mul(self.config.side_candidate_multiplier)
    }

    pub fn weighted_search(&self, query: &str, alpha: f32, limit: usize) -> Result<Vec<FusionRecord>> {
        let gen = self.generation();
        let side = self.side_limit(limit);
        let bm25 = self.keyword_in(&gen, query, side)?;
        let semantic = self.semantic_search_in(&gen, query, side)?;
        weighted_fusion(&bm25, &semantic, alpha, limit)
    }

    /// RRF over both sides. With a rerank method the fused window is widened
    /// before the judge reorders and truncates it.
    pub fn rrf_search(
        &self,
        query: &str,
        k: u32,
        limit: usize,
        rerank: Option<RerankMethod>,
    ) -> Result<Vec<FusionRecord>> {
        let window = match rerank {
            Some(_) => limit.saturating_mul(self.config.rerank_window_multiplier),
            None => limit,
        };
        let gen = self.generation();
        let side = self.side_limit(window);
        let bm25 = self.keyword_in(&gen, query, side)?;
        let semantic = self.semantic_search_in(&gen, query, side)?;
        let fused = rrf_fusion(&bm25, &semantic, k, window)?;
        tracing::debug!(query, bm25 = bm25.len(), semantic = semantic.len(), fused = fused.len(), "rrf fusion");
        match rerank {
            Some(method) => self.reranker.rerank(query, fused, method, limit),
            None => Ok(fused),
        }
    }

    pub fn enhance(&self, query: &str, method: QueryEnhancement) -> Result<String> {
        let completer = self.completer.as_deref().ok_or(SearchError::MissingCollaborator {
            method: "query enhancement",
            collaborator: "text completion",
        })?;
        enhance_query(completer, query, method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::RetrievalStrategy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingEmbedder(AtomicUsize);

    impl Embedder for CountingEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let lower = text.to_lowercase();
            Ok(["bear", "city", "shark"].iter().map(|w| lower.matches(w).count() as f32).collect())
        }
    }

    fn movies() -> Vec<Document> {
        vec![
            Document { id: 1, title: "Paddington".into(), description: "A bear comes to London".into() },
            Document { id: 2, title: "The Revenant".into(), description: "A man is attacked by a bear".into() },
            Document { id: 3, title: "Zootopia".into(), description: "Animals in a city".into() },
        ]
    }

    #[test]
    fn first_query_builds_and_saves_then_reuses() {
        let dir = tempdir().unwrap();
        let embedder = Arc::new(CountingEmbedder::default());
        let engine = HybridSearch::new(movies(), embedder.clone(), SearchConfig::new(dir.path()));
        assert!(!snapshot_exists(&IndexPaths::new(dir.path())));

        let hits = engine.rrf_search("bear", 60, 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(snapshot_exists(&IndexPaths::new(dir.path())));
        // three documents plus the query
        assert_eq!(embedder.0.load(Ordering::SeqCst), 4);

        engine.rrf_search("city", 60, 2, None).unwrap();
        assert_eq!(embedder.0.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn second_engine_loads_cached_state() {
        let dir = tempdir().unwrap();
        HybridSearch::new(movies(), Arc::new(CountingEmbedder::default()), SearchConfig::new(dir.path()))
            .rebuild()
            .unwrap();

        let embedder = Arc::new(CountingEmbedder::default());
        let engine = HybridSearch::new(movies(), embedder.clone(), SearchConfig::new(dir.path()));
        let hits = engine.weighted_search("bear", 0.5, 3).unwrap();
        assert_eq!(hits[0].document.id, 1);
        assert_eq!(embedder.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chunked_strategy_searches_by_passage() {
        let dir = tempdir().unwrap();
        let config = SearchConfig::new(dir.path()).with_strategy(RetrievalStrategy::chunked());
        let engine = HybridSearch::new(movies(), Arc::new(CountingEmbedder::default()), config);
        let hits = engine.semantic_search("city", 1).unwrap();
        assert_eq!(hits[0].document.id, 3);
    }

    #[test]
    fn rerank_window_is_widened_before_truncation() {
        struct Reverse;
        impl crate::rerank::CrossEncoder for Reverse {
            fn score_pairs(&self, pairs: &[(String, String)]) -> anyhow::Result<Vec<f32>> {
                Ok((0..pairs.len()).map(|i| i as f32).collect())
            }
        }
        let dir = tempdir().unwrap();
        let engine = HybridSearch::new(movies(), Arc::new(CountingEmbedder::default()), SearchConfig::new(dir.path()))
            .with_reranker(Reranker::new().with_cross_encoder(Arc::new(Reverse)));
        let plain = engine.rrf_search("bear", 60, 1, None).unwrap();
        let reranked = engine.rrf_search("bear", 60, 1, Some(RerankMethod::CrossEncoder)).unwrap();
        assert_eq!(reranked.len(), 1);
        // the judge favours the last of the widened window, which plain RRF cut off
        assert_ne!(reranked[0].id(), plain[0].id());
        assert!(reranked[0].rerank_score.is_some());
    }

    #[test]
    fn enhancement_without_completer_fails() {
        let dir = tempdir().unwrap();
        let engine = HybridSearch::new(movies(), Arc::new(CountingEmbedder::default()), SearchConfig::new(dir.path()));
        assert!(matches!(
            engine.enhance("bear", QueryEnhancement::Spell),
            Err(SearchError::MissingCollaborator { .. })
        ));
    }

    fn sequels() -> Vec<Document> {
        vec![
            Document { id: 11, title: "Paddington 2".into(), description: "The bear goes to prison".into() },
            Document { id: 12, title: "Grizzly Man".into(), description: "A bear enthusiast in Alaska".into() },
            Document { id: 13, title: "Cocaine Bear".into(), description: "A bear finds a duffel bag".into() },
            Document { id: 14, title: "Jaws".into(), description: "A shark near a city beach".into() },
        ]
    }

    #[test]
    fn documents_are_found_by_id() {
        let dir = tempdir().unwrap();
        let mut docs = movies();
        docs.push(Document { id: 2, title: "Duplicate".into(), description: "A later copy".into() });
        let engine = HybridSearch::new(docs, Arc::new(CountingEmbedder::default()), SearchConfig::new(dir.path()));
        assert_eq!(engine.document(3).unwrap().title, "Zootopia");
        assert_eq!(engine.document(2).unwrap().title, "The Revenant");
        assert!(engine.document(99).is_none());
        assert_eq!(engine.num_documents(), 4);
    }

    #[test]
    fn rebuild_with_replaces_corpus_and_lookup() {
        let dir = tempdir().unwrap();
        let engine = HybridSearch::new(movies(), Arc::new(CountingEmbedder::default()), SearchConfig::new(dir.path()));
        engine.keyword_search("bear", 3).unwrap();
        engine.rebuild_with(sequels()).unwrap();
        assert!(engine.document(1).is_none());
        assert_eq!(engine.document(13).unwrap().title, "Cocaine Bear");
        let ids: Vec<DocId> = engine.keyword_search("shark", 3).unwrap().iter().map(|h| h.document.id).collect();
        assert_eq!(ids, vec![14]);

        // a fresh engine over the new corpus picks up the rebuilt caches
        let reloaded = HybridSearch::new(sequels(), Arc::new(CountingEmbedder::default()), SearchConfig::new(dir.path()));
        assert_eq!(reloaded.lexical().unwrap().num_docs(), 4);
    }

    #[test]
    fn queries_racing_a_corpus_swap_see_one_corpus() {
        let dir = tempdir().unwrap();
        let engine = HybridSearch::new(movies(), Arc::new(CountingEmbedder::default()), SearchConfig::new(dir.path()));
        engine.rrf_search("bear", 60, 3, None).unwrap();

        let old: Vec<DocId> = movies().iter().map(|d| d.id).collect();
        let new: Vec<DocId> = sequels().iter().map(|d| d.id).collect();
        let from_one_corpus = |ids: &[DocId]| ids.iter().all(|id| old.contains(id)) || ids.iter().all(|id| new.contains(id));
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !done.load(Ordering::SeqCst) {
                        let fused: Vec<DocId> =
                            engine.rrf_search("bear city", 60, 5, None).unwrap().iter().map(FusionRecord::id).collect();
                        assert!(!fused.is_empty());
                        assert!(from_one_corpus(&fused), "mixed corpora in {fused:?}");
                        let keyword: Vec<DocId> =
                            engine.keyword_search("bear", 5).unwrap().iter().map(|h| h.document.id).collect();
                        assert!(from_one_corpus(&keyword), "mixed corpora in {keyword:?}");
                    }
                });
            }
            for round in 0..6 {
                let docs = if round % 2 == 0 { sequels() } else { movies() };
                engine.rebuild_with(docs).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        // the last swap installed the original corpus
        assert_eq!(engine.document(1).unwrap().title, "Paddington");
    }
}
