//! On-disk snapshots of the lexical index and the embedding caches.
//!
//! Loaded snapshots are never checked against the current corpus; a stale cache
//! is served until it is rebuilt.

use crate::error::{Result, SearchError};
use crate::index::{DocId, Document, InvertedIndex};
use crate::tokenizer::Tokenizer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, create_dir_all, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub created_at: String,
    pub version: u32,
}

/// Cache locations, all under one root directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn lexical_dir(&self) -> PathBuf { self.root.join("lexical") }
    fn staging_dir(&self) -> PathBuf { self.root.join("lexical.staging") }
    fn retired_dir(&self) -> PathBuf { self.root.join("lexical.retired") }
    pub fn document_embeddings(&self) -> PathBuf { self.root.join("document_embeddings.bin") }
    pub fn chunk_embeddings(&self) -> PathBuf { self.root.join("chunk_embeddings.bin") }
    pub fn chunk_metadata(&self) -> PathBuf { self.root.join("chunk_metadata.json") }
}

fn postings_file(dir: &Path) -> PathBuf { dir.join("postings.bin") }
fn docmap_file(dir: &Path) -> PathBuf { dir.join("docmap.bin") }
fn term_frequencies_file(dir: &Path) -> PathBuf { dir.join("term_frequencies.bin") }
fn doc_lengths_file(dir: &Path) -> PathBuf { dir.join("doc_lengths.bin") }
fn meta_file(dir: &Path) -> PathBuf { dir.join("meta.json") }

pub(crate) fn write_bincode<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut f, value)?;
    f.flush()?;
    Ok(())
}

pub(crate) fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(f)?)
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(f)?)
}

/// True when all four lexical artifacts are present.
pub fn snapshot_exists(paths: &IndexPaths) -> bool {
    let dir = paths.lexical_dir();
    [postings_file(&dir), docmap_file(&dir), term_frequencies_file(&dir), doc_lengths_file(&dir)]
        .iter()
        .all(|p| p.is_file())
}

/// Persist the index as one unit.
///
/// Artifacts are written to a staging directory that is renamed over the live
/// snapshot once complete.
pub fn save_index(paths: &IndexPaths, index: &InvertedIndex) -> Result<()> {
    create_dir_all(&paths.root)?;
    let staging = paths.staging_dir();
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    create_dir_all(&staging)?;

    write_bincode(&postings_file(&staging), &index.postings)?;
    write_bincode(&docmap_file(&staging), &index.docmap)?;
    write_bincode(&term_frequencies_file(&staging), &index.term_frequencies)?;
    write_bincode(&doc_lengths_file(&staging), &index.doc_lengths)?;
    let meta = MetaFile {
        num_docs: index.num_docs() as u32,
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        version: SNAPSHOT_VERSION,
    };
    write_json(&meta_file(&staging), &meta)?;

    let live = paths.lexical_dir();
    let retired = paths.retired_dir();
    if live.exists() {
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }
        fs::rename(&live, &retired)?;
    }
    fs::rename(&staging, &live)?;
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    tracing::info!(path = %live.display(), num_docs = meta.num_docs, "saved lexical snapshot");
    Ok(())
}

/// Restore a snapshot written by [`save_index`].
pub fn load_index(paths: &IndexPaths, tokenizer: Tokenizer) -> Result<InvertedIndex> {
    let dir = paths.lexical_dir();
    if !snapshot_exists(paths) {
        return Err(SearchError::CacheMissing { path: dir });
    }
    let postings: HashMap<String, BTreeSet<DocId>> = read_bincode(&postings_file(&dir))?;
    let docmap: HashMap<DocId, Document> = read_bincode(&docmap_file(&dir))?;
    let term_frequencies: HashMap<DocId, HashMap<String, u32>> = read_bincode(&term_frequencies_file(&dir))?;
    let doc_lengths: HashMap<DocId, u32> = read_bincode(&doc_lengths_file(&dir))?;

    match load_meta(paths) {
        Ok(m) => tracing::debug!(num_docs = m.num_docs, created_at = %m.created_at, version = m.version, "snapshot meta"),
        Err(e) => tracing::debug!(error = %e, "snapshot has no readable meta.json"),
    }
    tracing::info!(path = %dir.display(), num_docs = docmap.len(), num_terms = postings.len(), "loaded lexical snapshot");
    Ok(InvertedIndex::from_tables(postings, docmap, term_frequencies, doc_lengths, tokenizer))
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    read_json(&meta_file(&paths.lexical_dir()))
}

impl InvertedIndex {
    pub fn save(&self, paths: &IndexPaths) -> Result<()> {
        save_index(paths, self)
    }

    pub fn load(paths: &IndexPaths, tokenizer: Tokenizer) -> Result<Self> {
        load_index(paths, tokenizer)
    }
}
