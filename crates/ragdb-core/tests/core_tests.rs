use std::fs;
use std::io::Write;
use tempfile::TempDir;

use ragdb_core::data_processor::{chunk_text, clean_text, ChunkingConfig, DataProcessor};
use ragdb_core::{Error, Record};

#[test]
fn process_directory_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let file_path = dir.join("a.txt");
    let mut f = fs::File::create(&file_path).unwrap();
    writeln!(f, "Short   text\n\nwith  gaps").unwrap();

    let processor = DataProcessor::new();
    let records = processor.process_directory(dir).expect("process");

    assert_eq!(records.len(), 1, "one small page becomes one chunk");
    let r = &records[0];
    assert_eq!(r.text, "Short text with gaps");
    assert_eq!(r.source.as_deref(), Some("a.txt"));
    assert_eq!(r.page, Some(1));
    assert_eq!(r.chunk_index, Some(0));
    assert!(r.path.as_deref().unwrap().ends_with("a.txt"));
}

#[test]
fn form_feeds_split_pages_and_blank_pages_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let file_path = tmp.path().join("book.txt");
    fs::write(&file_path, "first page\x0C   \x0Cthird page").unwrap();

    let records = DataProcessor::new().process_path(&file_path).expect("process");
    let pages: Vec<_> = records.iter().map(|r| r.page).collect();
    assert_eq!(pages, vec![Some(1), Some(3)]);
    assert_eq!(records[1].text, "third page");
}

#[test]
fn non_txt_path_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("doc.pdf");
    fs::write(&pdf, b"%PDF").unwrap();
    let err = DataProcessor::new().process_path(&pdf).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn windows_overlap_and_end_at_text_end() {
    let text: String = "abcdefghij".repeat(3);
    let chunks = chunk_text(&text, 12, 4);
    assert_eq!(chunks[0], text[0..12]);
    assert_eq!(chunks[1], text[8..20]);
    assert_eq!(chunks.last().unwrap().chars().last(), text.chars().last());
    for pair in chunks.windows(2) {
        let tail: String = pair[0].chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        assert!(pair[1].starts_with(&tail), "adjacent windows share the overlap");
    }
    assert!(chunk_text("", 12, 4).is_empty());
    assert_eq!(chunk_text("short", 12, 4), vec!["short".to_string()]);
}

#[test]
fn chunking_counts_characters_not_bytes() {
    let text = "é".repeat(10);
    let chunks = chunk_text(&text, 4, 1);
    assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    let processor = DataProcessor::with_config(ChunkingConfig { chunk_size: 4, overlap: 1 });
    let tmp = TempDir::new().unwrap();
    let p = tmp.path().join("u.txt");
    fs::write(&p, &text).unwrap();
    assert_eq!(processor.process_path(&p).unwrap().len(), chunks.len());
}

#[test]
fn clean_text_collapses_whitespace_and_nuls() {
    assert_eq!(clean_text("  a\0b \n\t c  "), "a b c");
}

#[test]
fn record_validation() {
    assert!(Record::new("  ").validate().is_err());
    assert!(Record::new("ok").with_page(0).validate().is_err());
    assert!(Record::new("ok").with_page(2).validate().is_ok());
}
