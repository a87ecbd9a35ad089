use std::fs;
use std::io::Write;
use tempfile::TempDir;

use propdb_core::chunker::ChunkingConfig;
use propdb_core::data_processor::{DataProcessor, DEFAULT_DOCUMENT_ID};
use propdb_core::types::SourceKind;
use propdb_core::Error;

fn processor() -> DataProcessor {
    DataProcessor::new(ChunkingConfig::new(200, 40).unwrap(), vec!["txt".into(), ".MD".into()])
}

#[test]
fn process_directory_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let mut f = fs::File::create(dir.join("a.txt")).unwrap();
    writeln!(f, "Short text").unwrap();

    let corpus = processor().process_directory(dir).expect("process");

    assert!(!corpus.synthetic);
    assert_eq!(corpus.chunks.len(), 1, "one small paragraph becomes one chunk");
    assert_eq!(corpus.chunks[0].chunk.text, "Short text");
    assert_eq!(corpus.chunks[0].chunk.parent_document_id, "a.txt");
    assert_eq!(corpus.chunks[0].metadata.filename, "a.txt");
    assert_eq!(corpus.chunks[0].metadata.file_type, "txt");
}

#[test]
fn only_configured_extensions_are_collected_in_path_order() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("rules")).unwrap();
    fs::write(dir.join("rules/house.md"), "No pets.").unwrap();
    fs::write(dir.join("b.txt"), "charlie delta").unwrap();
    fs::write(dir.join("a.txt"), "alpha bravo").unwrap();
    fs::write(dir.join("photo.jpg"), [0xff, 0xd8, 0xff]).unwrap();

    let docs = processor().collect_documents(dir).expect("collect");
    let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["a.txt", "b.txt", "rules/house.md"]);
    assert!(docs.iter().all(|d| d.source_kind == SourceKind::File));
}

#[test]
fn empty_and_whitespace_files_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("blank.txt"), "  \n\n ").unwrap();
    fs::write(dir.join("wifi.txt"), "WIFI: network CabinGuest").unwrap();

    let docs = processor().collect_documents(dir).expect("collect");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "wifi.txt");
}

#[test]
fn invalid_utf8_is_read_lossily() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("latin1.txt"), b"Caf\xe9 nearby").unwrap();

    let docs = processor().collect_documents(dir).expect("collect");
    assert!(docs[0].content.starts_with("Caf"));
    assert!(docs[0].content.ends_with("nearby"));
}

#[test]
fn empty_corpus_is_reported_then_replaced_by_default_document() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    let err = processor().collect_documents(dir).unwrap_err();
    assert!(matches!(err, Error::EmptyCorpus(_)));

    let corpus = processor().process_directory(dir).expect("process");
    assert!(corpus.synthetic);
    assert_eq!(corpus.documents.len(), 1);
    assert_eq!(corpus.documents[0].id, DEFAULT_DOCUMENT_ID);
    assert_eq!(corpus.documents[0].source_kind, SourceKind::Synthetic);
    assert!(corpus.chunks.iter().any(|c| c.chunk.text.contains("AMENITIES")));
}

#[test]
fn missing_corpus_directory_is_created() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("not-yet");

    let corpus = processor().process_directory(&dir).expect("process");
    assert!(dir.is_dir());
    assert!(corpus.synthetic);
}

#[test]
fn uncreatable_corpus_directory_is_a_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("file");
    fs::write(&blocker, "not a directory").unwrap();

    let err = processor().process_directory(&blocker.join("corpus")).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err}");
}

#[test]
fn long_documents_chunk_with_sections_in_metadata() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let body = format!(
        "AMENITIES:\n{}\nHOUSE RULES:\n{}",
        "Hot tub, fire pit, kayaks. ".repeat(10),
        "Quiet hours after 10 PM. ".repeat(10)
    );
    fs::write(dir.join("lake-house.txt"), body).unwrap();

    let corpus = processor().process_directory(dir).expect("process");
    assert!(corpus.chunks.len() > 2);
    assert_eq!(corpus.chunks[0].metadata.section.as_deref(), Some("amenities"));
    assert_eq!(corpus.chunks.last().unwrap().metadata.section.as_deref(), Some("house_rules"));
    for (i, c) in corpus.chunks.iter().enumerate() {
        assert_eq!(c.chunk.sequence_index, i);
        assert!(c.chunk.text.chars().count() <= 200);
    }
}
