use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use tutordb_core::chunker::{classify, Chunker, ChunkingConfig};
use tutordb_core::error::Error;
use tutordb_core::types::ChunkKind;

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    fs::read_to_string(path).expect("fixture")
}

#[test]
fn one_page_circuits_document_yields_three_facts_and_one_activity() {
    let chunks = Chunker::default().chunk(&fixture("closed_open_circuits.md")).expect("chunk");
    let facts = chunks.iter().filter(|c| c.kind == ChunkKind::Fact).count();
    let activities = chunks.iter().filter(|c| c.kind == ChunkKind::Activity).count();
    assert_eq!((facts, activities), (3, 1));
    assert_eq!(chunks[1].heading, "Closed circuit");
    assert_eq!(chunks[3].heading, "Activity: Make a switch");
}

#[test]
fn ordinals_start_at_zero_and_increase() {
    let chunks = Chunker::default().chunk(&fixture("closed_open_circuits.md")).expect("chunk");
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.ordinal, i);
    }
}

#[test]
fn whitespace_only_document_is_empty() {
    let chunker = Chunker::default();
    assert!(matches!(chunker.chunk("  \n\n\t \r\n"), Err(Error::EmptyDocument)));
    assert!(matches!(chunker.chunk("# Title only\n\n## Another"), Err(Error::EmptyDocument)));
}

#[test]
fn oversized_sections_never_exceed_limit() {
    let max = 120;
    let chunker = Chunker::new(ChunkingConfig { max_chars: max, overlap_chars: 0 });
    let paragraph = "Current flows from the positive terminal. ".repeat(8);
    let huge_word = "a".repeat(300);
    let text = format!("# Notes\n\n{paragraph}\n\nShort paragraph.\n\n{huge_word} tail words here.");
    let chunks = chunker.chunk(&text).expect("chunk");
    assert!(chunks.len() > 4);
    for c in &chunks {
        let len = c.text.chars().count();
        assert!(len > 0 && len <= max, "chunk of {len} chars");
        assert_eq!(c.text, c.text.trim());
    }
    // Source order survives splitting.
    let joined: String = chunks.iter().map(|c| c.text.replace(char::is_whitespace, "")).collect();
    let expected: String = text.replace("# Notes", "").replace(char::is_whitespace, "");
    assert_eq!(joined, expected);
}

#[test]
fn split_sections_carry_trailing_words_forward() {
    let chunker = Chunker::new(ChunkingConfig { max_chars: 100, overlap_chars: 30 });
    let text = (1..=8).map(|i| format!("Sentence number {i} ends here.")).collect::<Vec<_>>().join(" ");
    let chunks = chunker.chunk(&text).expect("chunk");
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[0].text, "Sentence number 1 ends here. Sentence number 2 ends here.");
    assert_eq!(
        chunks[1].text,
        "Sentence number 2 ends here. Sentence number 3 ends here. Sentence number 4 ends here."
    );
    assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
    assert!(chunks.iter().all(|c| c.kind == ChunkKind::Fact && c.heading == "General"));
}

#[test]
fn short_sections_are_not_overlapped() {
    let chunks = Chunker::default().chunk("# A\n\nAlpha text.\n\n# B\n\nBeta text.").expect("chunk");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1].text, "Beta text.");
}

#[test]
fn paragraphs_pack_before_sentences_split() {
    let chunker = Chunker::new(ChunkingConfig { max_chars: 60, overlap_chars: 0 });
    let text = "First short paragraph.\n\nSecond short one.\n\nThird paragraph is here.";
    let chunks = chunker.chunk(text).expect("chunk");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "First short paragraph.\n\nSecond short one.");
    assert_eq!(chunks[1].text, "Third paragraph is here.");
}

#[test]
fn classification_is_deterministic() {
    let body = "Materials: a cell.\n1. Connect the wires.\n2. Close the switch.";
    let first = classify("Try it", body);
    for _ in 0..10 {
        assert_eq!(classify("Try it", body), first);
    }
    assert_eq!(first, ChunkKind::Activity);
    assert_eq!(classify("Conductors", "Copper is a good conductor of electricity."), ChunkKind::Fact);
    assert_eq!(classify("Lab safety", "Wear goggles."), ChunkKind::Activity);
    assert_eq!(classify("Labels", "A label names a part."), ChunkKind::Fact);
}

#[test]
fn chunks_text_read_from_disk_with_crlf() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("notes.txt");
    fs::write(&path, "Insulators block current.\r\n\r\n\r\n\r\nRubber is an insulator.\r\n").unwrap();
    let text = fs::read_to_string(&path).unwrap();
    let chunks = Chunker::default().chunk(&text).expect("chunk");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "Insulators block current.\n\nRubber is an insulator.");
    assert_eq!(chunks[0].heading, "General");
}
