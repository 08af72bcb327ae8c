//! Loading movie records from disk.
//!
//! Accepts a single file or a directory walked recursively. `.json` files may hold
//! `{"movies": [...]}`, a bare array, or one object; `.jsonl` files hold one movie
//! per line.

use anyhow::{bail, Context, Result};
use reelsearch_core::Document;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Deserialize)]
#[serde(untagged)]
enum MovieFile {
    Wrapped { movies: Vec<Document> },
    List(Vec<Document>),
    Single(Document),
}

fn corpus_files(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")))
        .collect();
    files.sort();
    files
}

pub fn load_movies(input: &Path) -> Result<Vec<Document>> {
    if !input.exists() {
        bail!("corpus path {} does not exist", input.display());
    }
    let mut movies = Vec::new();
    for file in corpus_files(input) {
        let before = movies.len();
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file, &mut movies)?;
        } else {
            let reader = BufReader::new(File::open(&file)?);
            let parsed: MovieFile =
                serde_json::from_reader(reader).with_context(|| format!("parsing {}", file.display()))?;
            match parsed {
                MovieFile::Wrapped { movies: m } | MovieFile::List(m) => movies.extend(m),
                MovieFile::Single(m) => movies.push(m),
            }
        }
        tracing::debug!(file = %file.display(), count = movies.len() - before, "read movies");
    }

    let mut seen = HashSet::with_capacity(movies.len());
    if let Some(dup) = movies.iter().find(|m| !seen.insert(m.id)) {
        bail!("movie id {} appears more than once in the corpus", dup.id);
    }
    tracing::info!(num_docs = movies.len(), path = %input.display(), "loaded corpus");
    Ok(movies)
}

fn read_jsonl(file: &Path, out: &mut Vec<Document>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), n + 1))?;
        out.push(doc);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    pub query: String,
    /// Titles a good search should return.
    pub relevant_docs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoldenDataset {
    pub test_cases: Vec<TestCase>,
}

pub fn load_golden_dataset(path: &Path) -> Result<GoldenDataset> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}
