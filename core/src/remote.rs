//! HTTP implementations of the collaborator traits.
//!
//! - [`TeiClient`]: a text-embeddings-inference style server (`/embed`, `/rerank`)
//! - [`GeminiClient`]: Google's `generateContent` endpoint

use crate::llm::{ImageInput, TextCompleter};
use crate::rerank::CrossEncoder;
use crate::vector::Embedder;
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const USER_AGENT: &str = concat!("reelsearch/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-001";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().user_agent(USER_AGENT).timeout(timeout).build()?)
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

/// Client for an embedding/rerank server. Texts are sent in batches of `batch_size`.
#[derive(Clone)]
pub struct TeiClient {
    base_url: String,
    http: Client,
    batch_size: usize,
}

impl TeiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: http_client(Duration::from_secs(60))?,
            batch_size: 32,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embed", self.base_url);
        let vectors: Vec<Vec<f32>> = self
            .http
            .post(&url)
            .json(&EmbedRequest { inputs: texts })
            .send()
            .with_context(|| format!("POST {url}"))?
            .error_for_status()?
            .json()?;
        if vectors.len() != texts.len() {
            return Err(anyhow!("embedding server returned {} vectors for {} inputs", vectors.len(), texts.len()));
        }
        Ok(vectors)
    }
}

impl Embedder for TeiClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_chunk(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow!("embedding server returned no vector"))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for (i, chunk) in texts.chunks(self.batch_size).enumerate() {
            tracing::debug!(batch = i, size = chunk.len(), "embedding batch");
            out.extend(self.embed_chunk(chunk)?);
        }
        Ok(out)
    }
}

impl CrossEncoder for TeiClient {
    fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        let mut scores = vec![0.0f32; pairs.len()];
        // pairs from one rerank call share the query; group anyway so mixed input stays correct
        let mut start = 0;
        while start < pairs.len() {
            let query = &pairs[start].0;
            let end = pairs[start..].iter().position(|(q, _)| q != query).map_or(pairs.len(), |n| start + n);
            let texts: Vec<String> = pairs[start..end].iter().map(|(_, t)| t.clone()).collect();
            let url = format!("{}/rerank", self.base_url);
            let hits: Vec<RerankHit> = self
                .http
                .post(&url)
                .json(&RerankRequest { query, texts: &texts })
                .send()
                .with_context(|| format!("POST {url}"))?
                .error_for_status()?
                .json()?;
            for hit in hits {
                let slot = scores
                    .get_mut(start + hit.index)
                    .filter(|_| hit.index < texts.len())
                    .ok_or_else(|| anyhow!("rerank server returned out-of-range index {}", hit.index))?;
                *slot = hit.score;
            }
            start = end;
        }
        Ok(scores)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    http: Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self { api_key: api_key.into(), model: model.into(), http: http_client(Duration::from_secs(120))? })
    }

    /// Reads `GEMINI_API_KEY` and optionally `GEMINI_MODEL`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is not set")?;
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string());
        Self::new(key, model)
    }
}

impl GeminiClient {
    fn generate(&self, parts: Vec<Part<'_>>) -> Result<String> {
        let url = format!("{GEMINI_BASE}/models/{}:generateContent", self.model);
        let body = GenerateRequest { contents: vec![Content { parts }] };
        let resp: GenerateResponse = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .with_context(|| format!("POST {url}"))?
            .error_for_status()?
            .json()?;
        if let Some(usage) = &resp.usage_metadata {
            tracing::debug!(
                prompt_tokens = usage.prompt_token_count,
                response_tokens = usage.candidates_token_count,
                model = %self.model,
                "completion usage"
            );
        }
        let text: String = resp
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .ok_or_else(|| anyhow!("completion response had no candidates"))?;
        Ok(text)
    }
}

impl TextCompleter for GeminiClient {
    fn complete_text(&self, prompt: &str) -> Result<String> {
        self.generate(vec![Part::Text { text: prompt }])
    }

    fn complete_with_image(&self, prompt: &str, image: ImageInput<'_>, text: &str) -> Result<String> {
        let data = base64::engine::general_purpose::STANDARD.encode(image.bytes);
        self.generate(vec![
            Part::Text { text: prompt },
            Part::Inline { inline_data: InlineData { mime_type: image.mime_type, data } },
            Part::Text { text },
        ])
    }
}
