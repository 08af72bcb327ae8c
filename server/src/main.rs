use anyhow::Result;
use clap::Parser;
use reelsearch_cli::corpus::load_movies;
use reelsearch_core::remote::{GeminiClient, TeiClient};
use reelsearch_core::rerank::Reranker;
use reelsearch_core::{HybridSearch, RetrievalStrategy, SearchConfig};
use reelsearch_server::build_app;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Movie corpus file or directory
    #[arg(long, default_value = "data/movies.json")]
    corpus: PathBuf,
    /// Cache directory for the index snapshot and embeddings
    #[arg(long, default_value = "cache")]
    cache: PathBuf,
    /// Base URL of the embedding server
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: String,
    /// Base URL of the cross-encoder server; defaults to the embedding server
    #[arg(long, env = "RERANK_URL")]
    rerank_url: Option<String>,
    /// Score semantic matches by sentence chunk
    #[arg(long, default_value_t = false)]
    chunked: bool,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

fn build_engine(args: &Args) -> Result<HybridSearch> {
    let movies = load_movies(&args.corpus)?;
    let strategy = if args.chunked { RetrievalStrategy::chunked() } else { RetrievalStrategy::Document };
    let config = SearchConfig::new(&args.cache).with_strategy(strategy);
    let embedder = Arc::new(TeiClient::new(args.embedding_url.as_str())?);

    let cross_encoder = TeiClient::new(args.rerank_url.as_deref().unwrap_or(&args.embedding_url))?;
    let mut reranker = Reranker::new().with_cross_encoder(Arc::new(cross_encoder));
    let mut engine = HybridSearch::new(movies, embedder, config);
    match GeminiClient::from_env() {
        Ok(gemini) => {
            let gemini = Arc::new(gemini);
            reranker = reranker.with_completer(gemini.clone());
            engine = engine.with_completer(gemini);
        }
        Err(e) => tracing::warn!(error = %e, "completion service unavailable, LLM rerank methods disabled"),
    }
    Ok(engine.with_reranker(reranker))
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    // blocking HTTP clients must be created and dropped outside the async runtime
    let engine = Arc::new(build_engine(&args)?);
    let app = build_app(Arc::clone(&engine));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let served = runtime.block_on(async move {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "server listening");
        axum::serve(listener, app).await
    });
    drop(runtime);
    served?;
    Ok(())
}
