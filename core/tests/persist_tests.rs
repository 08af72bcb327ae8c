use reelsearch_core::persist::{load_meta, snapshot_exists, SNAPSHOT_VERSION};
use reelsearch_core::tokenizer::Tokenizer;
use reelsearch_core::{Bm25Params, Document, IndexPaths, InvertedIndex, SearchError};
use std::fs;
use tempfile::tempdir;

fn movies() -> Vec<Document> {
    vec![
        Document { id: 1, title: "Paddington".into(), description: "A bear comes to London".into() },
        Document { id: 2, title: "The Revenant".into(), description: "A man is attacked by a bear".into() },
        Document { id: 3, title: "Zootopia".into(), description: "Animals in a city".into() },
    ]
}

fn built() -> InvertedIndex {
    let mut index = InvertedIndex::new();
    index.build(&movies());
    index
}

#[test]
fn snapshot_round_trips_every_table() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    let index = built();
    index.save(&paths).unwrap();
    assert!(snapshot_exists(&paths));

    let loaded = InvertedIndex::load(&paths, Tokenizer::default()).unwrap();
    assert_eq!(loaded, index);
    let params = Bm25Params::default();
    assert_eq!(
        loaded.bm25_search("bear", 5, params).unwrap(),
        index.bm25_search("bear", 5, params).unwrap()
    );

    let meta = load_meta(&paths).unwrap();
    assert_eq!(meta.num_docs, 3);
    assert_eq!(meta.version, SNAPSHOT_VERSION);
    assert!(!meta.created_at.is_empty());
}

#[test]
fn saving_again_replaces_the_snapshot() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    built().save(&paths).unwrap();

    let mut smaller = InvertedIndex::new();
    smaller.build(&movies()[..1]);
    smaller.save(&paths).unwrap();

    let loaded = InvertedIndex::load(&paths, Tokenizer::default()).unwrap();
    assert_eq!(loaded.num_docs(), 1);
    assert!(!dir.path().join("lexical.staging").exists());
    assert!(!dir.path().join("lexical.retired").exists());
}

#[test]
fn load_without_snapshot_reports_missing_cache() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    let err = InvertedIndex::load(&paths, Tokenizer::default()).unwrap_err();
    assert!(matches!(err, SearchError::CacheMissing { .. }));
}

#[test]
fn one_missing_artifact_counts_as_no_snapshot() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    built().save(&paths).unwrap();
    fs::remove_file(paths.lexical_dir().join("doc_lengths.bin")).unwrap();

    assert!(!snapshot_exists(&paths));
    assert!(matches!(
        InvertedIndex::load(&paths, Tokenizer::default()),
        Err(SearchError::CacheMissing { .. })
    ));
}
