use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use reelsearch_cli::corpus::{load_golden_dataset, load_movies};
use reelsearch_cli::evaluation::evaluate;
use reelsearch_cli::report::{fused_lines, image_mime_type};
use reelsearch_core::config::{
    DEFAULT_ALPHA, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_SEARCH_LIMIT, DEFAULT_SENTENCE_CHUNK_OVERLAP,
    DEFAULT_SENTENCE_CHUNK_SIZE, RRF_K,
};
use reelsearch_core::fusion::{normalize, FusionRecord};
use reelsearch_core::llm::{answer, judge_relevance, rewrite_query_with_image, AnswerStyle, ImageInput, QueryEnhancement};
use reelsearch_core::remote::{GeminiClient, TeiClient};
use reelsearch_core::rerank::{RerankMethod, Reranker};
use reelsearch_core::tokenizer::Tokenizer;
use reelsearch_core::vector::{chunk_sentences, chunk_words};
use reelsearch_core::{
    Bm25Params, DocId, HybridSearch, IndexPaths, InvertedIndex, RetrievalStrategy, ScoredDocument, SearchConfig,
    SearchError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "reelsearch")]
#[command(about = "Keyword, semantic and hybrid search over a movie corpus", long_about = None)]
struct Cli {
    #[command(flatten)]
    common: Common,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    /// Movie corpus: a JSON/JSONL file or a directory of them
    #[arg(long, global = true, default_value = "data/movies.json")]
    corpus: PathBuf,
    /// Directory holding the index snapshot and embedding caches
    #[arg(long, global = true, default_value = "cache")]
    cache: PathBuf,
    /// Stop word list, one word per line; the built-in English list otherwise
    #[arg(long, global = true)]
    stopwords: Option<PathBuf>,
    /// Base URL of the embedding server
    #[arg(long, global = true, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,
    /// Base URL of the cross-encoder server; defaults to the embedding server
    #[arg(long, global = true, env = "RERANK_URL")]
    rerank_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the inverted index and save it to the cache directory
    Build,
    /// BM25 keyword search
    Search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Raw count of a term in one document
    Tf { doc_id: DocId, term: String },
    /// Classic inverse document frequency of a term
    Idf { term: String },
    Tfidf { doc_id: DocId, term: String },
    /// BM25 (Okapi) inverse document frequency of a term
    Bm25idf { term: String },
    /// BM25 term-frequency component for a term in one document
    Bm25tf {
        doc_id: DocId,
        term: String,
        #[arg(long, default_value_t = reelsearch_core::config::BM25_K1)]
        k1: f32,
        #[arg(long, default_value_t = reelsearch_core::config::BM25_B)]
        b: f32,
    },
    /// Min-max normalize a list of scores
    Normalize {
        #[arg(required = true, allow_negative_numbers = true)]
        scores: Vec<f32>,
    },
    /// Split text into word chunks, or sentence chunks with --sentences
    Chunk {
        text: String,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
        #[arg(long)]
        sentences: bool,
    },
    /// Embedding similarity search
    SemanticSearch {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        /// Score documents by their best-matching sentence chunk
        #[arg(long)]
        chunked: bool,
    },
    /// Hybrid search blending normalized BM25 and semantic scores
    WeightedSearch {
        query: String,
        #[arg(long, default_value_t = DEFAULT_ALPHA)]
        alpha: f32,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        #[arg(long)]
        chunked: bool,
    },
    /// Hybrid search with reciprocal rank fusion
    RrfSearch {
        query: String,
        #[arg(long, default_value_t = RRF_K)]
        k: u32,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        #[arg(long)]
        chunked: bool,
        /// Rewrite the query with the completion service first: spell|rewrite|expand
        #[arg(long)]
        enhance: Option<QueryEnhancement>,
        /// Reorder the fused results: individual|batch|cross_encoder
        #[arg(long)]
        rerank_method: Option<RerankMethod>,
        /// Grade the final results 0-3 with the completion service and sort by grade
        #[arg(long)]
        evaluate: bool,
    },
    /// Rewrite a text query using an image, through the completion service
    DescribeImage {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        query: String,
    },
    /// Precision@k and recall@k of RRF search against a golden dataset
    Evaluate {
        #[arg(long, default_value = "data/golden_dataset.json")]
        golden: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Search, then generate an answer from the top results
    Answer {
        query: String,
        #[arg(long, default_value = "rag")]
        style: AnswerStyle,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
}

impl Common {
    fn tokenizer(&self) -> Result<Tokenizer> {
        match &self.stopwords {
            Some(path) => Tokenizer::from_stopword_file(path)
                .with_context(|| format!("reading stop words from {}", path.display())),
            None => Ok(Tokenizer::default()),
        }
    }

    fn open_index(&self) -> Result<InvertedIndex> {
        match InvertedIndex::load(&IndexPaths::new(&self.cache), self.tokenizer()?) {
            Err(SearchError::CacheMissing { path }) => {
                bail!("no index at {}; run `reelsearch build` first", path.display())
            }
            other => Ok(other?),
        }
    }

    fn engine(&self, chunked: bool) -> Result<HybridSearch> {
        let Some(url) = &self.embedding_url else {
            bail!("semantic search needs an embedding server; pass --embedding-url or set EMBEDDING_URL");
        };
        let embedder = Arc::new(TeiClient::new(url.as_str())?);
        let strategy = if chunked { RetrievalStrategy::chunked() } else { RetrievalStrategy::Document };
        let config = SearchConfig::new(&self.cache).with_strategy(strategy);
        let movies = load_movies(&self.corpus)?;
        Ok(HybridSearch::new(movies, embedder, config).with_tokenizer(self.tokenizer()?))
    }

    fn reranker(&self, method: RerankMethod) -> Result<Reranker> {
        let reranker = Reranker::new();
        Ok(match method {
            RerankMethod::Individual | RerankMethod::Batch => reranker.with_completer(Arc::new(GeminiClient::from_env()?)),
            RerankMethod::CrossEncoder => {
                let Some(url) = self.rerank_url.as_ref().or(self.embedding_url.as_ref()) else {
                    bail!("cross-encoder reranking needs --rerank-url or RERANK_URL");
                };
                reranker.with_cross_encoder(Arc::new(TeiClient::new(url.as_str())?))
            }
        })
    }
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let common = &cli.common;

    match cli.command {
        Commands::Build => {
            let movies = load_movies(&common.corpus)?;
            let mut index = InvertedIndex::with_tokenizer(common.tokenizer()?);
            index.build(&movies);
            index.save(&IndexPaths::new(&common.cache))?;
            println!("Indexed {} movies into {}", index.num_docs(), common.cache.display());
        }
        Commands::Search { query, limit } => {
            let index = common.open_index()?;
            let hits = index.bm25_search(&query, limit, Bm25Params::default())?;
            print_scored(&hits);
        }
        Commands::Tf { doc_id, term } => {
            let tf = common.open_index()?.term_frequency(doc_id, &term)?;
            println!("Term frequency of '{term}' in document '{doc_id}': {tf}");
        }
        Commands::Idf { term } => {
            let idf = common.open_index()?.inverse_document_frequency(&term)?;
            println!("Inverse document frequency of '{term}': {idf:.2}");
        }
        Commands::Tfidf { doc_id, term } => {
            let score = common.open_index()?.tf_idf(doc_id, &term)?;
            println!("TF-IDF score of '{term}' in document '{doc_id}': {score:.2}");
        }
        Commands::Bm25idf { term } => {
            let idf = common.open_index()?.bm25_inverse_document_frequency(&term)?;
            println!("BM25 IDF score of '{term}': {idf:.2}");
        }
        Commands::Bm25tf { doc_id, term, k1, b } => {
            let tf = common.open_index()?.bm25_term_score(doc_id, &term, Bm25Params { k1, b })?;
            println!("BM25 TF score of '{term}' in document '{doc_id}': {tf:.2}");
        }
        Commands::Normalize { scores } => {
            for score in normalize(&scores) {
                println!("* {score:.4}");
            }
        }
        Commands::Chunk { text, chunk_size, overlap, sentences } => {
            let chunks = if sentences {
                chunk_sentences(
                    &text,
                    chunk_size.unwrap_or(DEFAULT_SENTENCE_CHUNK_SIZE),
                    overlap.unwrap_or(DEFAULT_SENTENCE_CHUNK_OVERLAP),
                )?
            } else {
                chunk_words(&text, chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE), overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP))?
            };
            println!("Chunking {} characters", text.chars().count());
            for (i, chunk) in chunks.iter().enumerate() {
                println!("{}. {chunk}", i + 1);
            }
        }
        Commands::SemanticSearch { query, limit, chunked } => {
            let hits = common.engine(chunked)?.semantic_search(&query, limit)?;
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. {} (score: {:.4})\n   {}", i + 1, hit.document.title, hit.score, hit.document.description);
            }
        }
        Commands::WeightedSearch { query, alpha, limit, chunked } => {
            let records = common.engine(chunked)?.weighted_search(&query, alpha, limit)?;
            print_fused(&records, None);
        }
        Commands::RrfSearch { query, k, limit, chunked, enhance, rerank_method, evaluate } => {
            let mut engine = common.engine(chunked)?;
            if let Some(method) = rerank_method {
                engine = engine.with_reranker(common.reranker(method)?);
            }
            let query = match enhance {
                Some(method) => {
                    engine = engine.with_completer(Arc::new(GeminiClient::from_env()?));
                    let enhanced = engine.enhance(&query, method)?;
                    println!("Enhanced query ({method:?}): '{query}' -> '{enhanced}'\n");
                    enhanced
                }
                None => query,
            };
            let mut records = engine.rrf_search(&query, k, limit, rerank_method)?;
            if evaluate {
                records = judge_relevance(&GeminiClient::from_env()?, &query, records, rerank_method)?;
            }
            print_fused(&records, rerank_method);
        }
        Commands::DescribeImage { image, query } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading image {}", image.display()))?;
            let input = ImageInput { bytes: &bytes, mime_type: image_mime_type(&image) };
            let rewritten = rewrite_query_with_image(&GeminiClient::from_env()?, &query, input)?;
            println!("Rewritten query: {rewritten}");
        }
        Commands::Evaluate { golden, limit } => {
            let dataset = load_golden_dataset(&golden)?;
            let report = evaluate(&common.engine(false)?, &dataset, limit)?;
            println!("k={limit}\n");
            for r in &report.results {
                println!("- Query: {}", r.query);
                println!("    - Precision@{limit}: {:.4}", r.precision);
                println!("    - Recall@{limit}: {:.4}", r.recall);
                println!("    - Retrieved: {}", r.retrieved.join(", "));
                println!("    - Relevant: {}", r.relevant.join(", "));
                println!();
            }
            println!("Mean precision@{limit}: {:.4}", report.mean_precision());
            println!("Mean recall@{limit}: {:.4}", report.mean_recall());
        }
        Commands::Answer { query, style, limit } => {
            let completer = GeminiClient::from_env()?;
            let records = common.engine(false)?.rrf_search(&query, RRF_K, limit, None)?;
            println!("Search Results:");
            for rec in &records {
                println!("  - {}", rec.document.title);
            }
            let text = answer(&completer, &query, &records, style)?;
            println!("\n{}:\n{text}", heading(style));
        }
    }
    Ok(())
}

fn print_scored(hits: &[ScoredDocument]) {
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. ({}) {} - Score: {:.2}", i + 1, hit.document.id, hit.document.title, hit.score);
    }
}

fn print_fused(records: &[FusionRecord], method: Option<RerankMethod>) {
    for line in fused_lines(records, method) {
        println!("{line}");
    }
}

fn heading(style: AnswerStyle) -> &'static str {
    match style {
        AnswerStyle::Rag => "RAG Response",
        AnswerStyle::Summarize => "LLM Summary",
        AnswerStyle::Citations => "LLM Answer",
        AnswerStyle::Question => "Answer",
    }
}
