//! Text-completion collaborator and the prompts sent to it.

use crate::error::{Result, SearchError};
use crate::fusion::FusionRecord;
use crate::rerank::RerankMethod;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```(?:json)?").expect("valid regex");
}

/// Image bytes attached to a completion request.
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
}

pub trait TextCompleter: Send + Sync {
    fn complete_text(&self, prompt: &str) -> anyhow::Result<String>;

    /// Complete from `prompt`, then `image`, then `text`, in that order.
    /// Completers without image support refuse.
    fn complete_with_image(&self, _prompt: &str, _image: ImageInput<'_>, _text: &str) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("this completer does not accept images"))
    }
}

/// Strip markdown code fences some models wrap JSON answers in.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEnhancement {
    Spell,
    Rewrite,
    Expand,
}

impl FromStr for QueryEnhancement {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "spell" => Ok(Self::Spell),
            "rewrite" => Ok(Self::Rewrite),
            "expand" => Ok(Self::Expand),
            other => Err(format!("unknown enhancement {other:?}, expected spell|rewrite|expand")),
        }
    }
}

impl QueryEnhancement {
    pub fn prompt(self, query: &str) -> String {
        match self {
            Self::Spell => format!(
                r#"Fix any spelling errors in this movie query.
Only correct obvious typos. Don't change correctly spelled words.
Query: "{query}"
If no errors, return the original query.
Corrected:"#
            ),
            Self::Rewrite => format!(
                r#"Rewrite this movie search query to be more specific and searchable.

Original: "{query}"

Consider:
- Common movie knowledge (famous actors, popular films)
- Genre conventions (horror = scary, animation = cartoon)
- Keep it concise (under 10 words)
- It should be a google style search query that's very specific
- Don't use boolean logic

Examples:

- "that bear movie where leo gets attacked" -> "The Revenant Leonardo DiCaprio bear attack"
- "movie about bear in london with marmalade" -> "Paddington London marmalade"
- "scary movie with bear from few years ago" -> "bear horror movie 2015-2020"

Rewritten query:"#
            ),
            Self::Expand => format!(
                r#"Expand this movie search query with related terms.

Add synonyms and related concepts that might appear in movie descriptions.
Keep expansions relevant and focused.
This will be appended to the original query.

Examples:

- "scary bear movie" -> "scary horror grizzly bear movie terrifying film"
- "action movie with bear" -> "action thriller bear chase fight adventure"
- "comedy with bear" -> "comedy funny bear humor lighthearted"

Query: "{query}"
"#
            ),
        }
    }
}

/// Rewrite `query` through the completer; an empty answer keeps the original.
pub fn enhance_query(completer: &dyn TextCompleter, query: &str, method: QueryEnhancement) -> Result<String> {
    let answer = completer.complete_text(&method.prompt(query))?;
    let enhanced = answer.trim().trim_matches('"').trim();
    if enhanced.is_empty() {
        return Ok(query.to_string());
    }
    tracing::info!(?method, original = query, enhanced, "enhanced query");
    Ok(enhanced.to_string())
}

const IMAGE_REWRITE_PROMPT: &str = "Given the included image and text query, rewrite the text query to improve search results from a movie database. Make sure to:
- Synthesize visual and textual information
- Focus on movie-specific details (actors, scenes, style, etc.)
- Return only the rewritten query, without any additional commentary";

/// Rewrite `query` using what the completer sees in `image`.
pub fn rewrite_query_with_image(completer: &dyn TextCompleter, query: &str, image: ImageInput<'_>) -> Result<String> {
    let query = query.trim();
    let answer = completer.complete_with_image(IMAGE_REWRITE_PROMPT, image, query)?;
    let rewritten = answer.trim();
    if rewritten.is_empty() {
        return Ok(query.to_string());
    }
    tracing::info!(original = query, rewritten, mime_type = image.mime_type, "rewrote query from image");
    Ok(rewritten.to_string())
}

fn rank_text(rank: Option<usize>) -> String {
    rank.map_or_else(|| "-".to_string(), |r| (r + 1).to_string())
}

/// Ask the completer to grade each result 0-3 against `query`.
pub fn relevance_prompt(query: &str, records: &[FusionRecord], method: Option<RerankMethod>) -> String {
    let mut lines = Vec::with_capacity(records.len() * 5);
    for (i, rec) in records.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, rec.document.title));
        if let (Some(method), Some(score)) = (method, rec.rerank_score) {
            lines.push(method.score_label(score));
        }
        lines.push(format!("RRF Score: {:.3}", rec.fused_score));
        lines.push(format!("BM25 Rank: {}, Semantic Rank: {}", rank_text(rec.bm25_rank), rank_text(rec.semantic_rank)));
        lines.push(rec.document.description.clone());
    }
    let results = lines.join("\n");
    format!(
        r#"Rate how relevant each result is to this query on a 0-3 scale. The current rankings are numbered.:

Query: "{query}"

Results:
{results}

Scale:
- 3: Highly relevant
- 2: Relevant
- 1: Marginally relevant
- 0: Not relevant

Do NOT give any numbers other than 0, 1, 2, or 3.

Return ONLY the scores in the same order as they are numbered. Return a valid JSON list, nothing else. For example:

[2, 0, 3, 2, 0, 1]"#
    )
}

/// Grade `records` through the completer and order them by grade, highest
/// first. Equal grades keep their incoming order.
pub fn judge_relevance(
    completer: &dyn TextCompleter,
    query: &str,
    mut records: Vec<FusionRecord>,
    method: Option<RerankMethod>,
) -> Result<Vec<FusionRecord>> {
    if records.is_empty() {
        return Ok(records);
    }
    let reply = completer.complete_text(&relevance_prompt(query, &records, method))?;
    let grades: Vec<u8> = serde_json::from_str(&strip_code_fences(&reply))
        .map_err(|e| anyhow::anyhow!("relevance reply is not a JSON list of grades: {e}"))?;
    if grades.len() != records.len() {
        return Err(anyhow::anyhow!("judge returned {} grades for {} results", grades.len(), records.len()).into());
    }
    if let Some(bad) = grades.iter().find(|g| **g > 3) {
        return Err(anyhow::anyhow!("relevance grade {bad} is outside 0-3").into());
    }
    for (rec, grade) in records.iter_mut().zip(grades) {
        rec.relevance = Some(grade);
    }
    records.sort_by(|a, b| b.relevance.cmp(&a.relevance));
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStyle {
    Rag,
    Summarize,
    Citations,
    Question,
}

impl FromStr for AnswerStyle {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rag" => Ok(Self::Rag),
            "summarize" => Ok(Self::Summarize),
            "citations" => Ok(Self::Citations),
            "question" => Ok(Self::Question),
            other => Err(format!("unknown answer style {other:?}, expected rag|summarize|citations|question")),
        }
    }
}

impl fmt::Display for AnswerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rag => "rag",
            Self::Summarize => "summarize",
            Self::Citations => "citations",
            Self::Question => "question",
        };
        f.write_str(s)
    }
}

/// Numbered result list used as context in answer prompts.
pub fn format_results(records: &[FusionRecord]) -> String {
    let mut lines = Vec::with_capacity(records.len() * 3);
    for (i, rec) in records.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, rec.document.title));
        lines.push(format!("Fused Score: {:.3}", rec.fused_score));
        lines.push(rec.document.description.clone());
    }
    lines.join("\n")
}

impl AnswerStyle {
    pub fn prompt(self, query: &str, records: &[FusionRecord]) -> String {
        let documents = format_results(records);
        match self {
            Self::Rag => format!(
                r#"Answer the question or provide information based on the provided documents. This should be tailored to users of a movie streaming service.

Query: {query}

Documents:
{documents}

Provide a comprehensive answer that addresses the query:"#
            ),
            Self::Summarize => format!(
                r#"Provide information useful to this query by synthesizing information from multiple search results in detail.
The goal is to provide comprehensive information so that users know what their options are.
Your response should be information-dense and concise, with several key pieces of information about the genre, plot, etc. of each movie.
This should be tailored to users of a movie streaming service.
Query: {query}
Search Results:
{documents}
Provide a comprehensive 3-4 sentence answer that combines information from multiple sources:"#
            ),
            Self::Citations => format!(
                r#"Answer the question or provide information based on the provided documents.

This should be tailored to users of a movie streaming service.

If not enough information is available to give a good answer, say so but give as good of an answer as you can while citing the sources you have.

Query: {query}

Documents:
{documents}

Instructions:
- Provide a comprehensive answer that addresses the query
- Cite sources using [1], [2], etc. format when referencing information
- If sources disagree, mention the different viewpoints
- If the answer isn't in the documents, say "I don't have enough information"
- Be direct and informative

Answer:"#
            ),
            Self::Question => format!(
                r#"Answer the user's question based on the provided movies that are available to stream.

Question: {query}

Documents:
{documents}

Instructions:
- Answer questions directly and concisely
- Be casual and conversational
- Don't be cringe or hype-y
- Talk like a normal person would in a chat conversation

Answer:"#
            ),
        }
    }
}

pub fn answer(completer: &dyn TextCompleter, query: &str, records: &[FusionRecord], style: AnswerStyle) -> Result<String> {
    if records.is_empty() {
        return Err(SearchError::InvalidFusionInput("no search results to answer from".into()));
    }
    let text = completer.complete_text(&style.prompt(query, records))?;
    Ok(text.trim().to_string())
}
