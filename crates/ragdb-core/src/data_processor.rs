//! Turns `.txt` documents into cleaned, overlapping character windows.
//!
//! Form feeds (`\x0C`, as emitted by `pdftotext`) split a file into pages; the
//! page number is the position marker carried by every record.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};
use crate::types::Record;

const PAGE_BREAK: char = '\x0C';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 800, overlap: 120 }
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(s: &ChunkingSettings) -> Self {
        Self { chunk_size: s.chunk_size, overlap: s.overlap }
    }
}

#[derive(Default)]
pub struct DataProcessor {
    chunking_config: ChunkingConfig,
}

impl DataProcessor {
    pub fn new() -> Self { Self::default() }

    pub fn with_config(chunking_config: ChunkingConfig) -> Self { Self { chunking_config } }

    /// Accepts a single `.txt` file or a directory searched recursively for them.
    pub fn process_path(&self, path: &Path) -> Result<Vec<Record>> {
        if path.is_dir() {
            return self.process_directory(path);
        }
        if is_txt(path) {
            return self.process_file(path);
        }
        Err(Error::InvalidConfig(format!("only .txt supported, got {}", path.display())))
    }

    pub fn process_directory(&self, data_dir: &Path) -> Result<Vec<Record>> {
        let files = self.list_txt_files(data_dir);
        if files.is_empty() {
            tracing::warn!(dir = %data_dir.display(), "no .txt files found");
            return Ok(vec![]);
        }
        let mut all_records = Vec::new();
        for (file_index, file_path) in files.iter().enumerate() {
            tracing::debug!("Processing file {}/{}: {}", file_index + 1, files.len(), file_path.display());
            all_records.extend(self.process_file(file_path)?);
        }
        tracing::info!("Processed {} files into {} chunks", files.len(), all_records.len());
        Ok(all_records)
    }

    pub fn process_file(&self, file_path: &Path) -> Result<Vec<Record>> {
        let content = self.read_file_content(file_path)?;
        let source = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.to_string_lossy().to_string());
        let path = file_path.to_string_lossy().to_string();
        let mut records = Vec::new();
        for (page_index, page) in content.split(PAGE_BREAK).enumerate() {
            let cleaned = clean_text(page);
            if cleaned.is_empty() {
                continue;
            }
            let page_no = u32::try_from(page_index + 1)
                .map_err(|_| Error::InvalidRecord(format!("too many pages in {}", path)))?;
            for (chunk_index, window) in chunk_text(&cleaned, self.chunking_config.chunk_size, self.chunking_config.overlap)
                .into_iter()
                .enumerate()
            {
                records.push(
                    Record::new(window)
                        .with_source(source.clone())
                        .with_path(path.clone())
                        .with_page(page_no)
                        .with_chunk_index(chunk_index),
                );
            }
        }
        Ok(records)
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    fn list_txt_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_txt(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        txt_files.sort();
        txt_files
    }
}

fn is_txt(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
}

/// Replaces NUL bytes, collapses whitespace runs to one space and trims.
pub fn clean_text(t: &str) -> String {
    t.replace('\0', " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits `text` into windows of `chunk_size` characters, each starting
/// `chunk_size - overlap` characters after the previous one. The last window
/// ends exactly at the end of the text.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut chunks = Vec::new();
    if n == 0 || chunk_size == 0 {
        return chunks;
    }
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(n);
        chunks.push(chars[start..end].iter().collect());
        if end == n {
            break;
        }
        start += step;
    }
    chunks
}
