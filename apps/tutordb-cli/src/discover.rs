//! Finds curriculum files laid out as
//! `<root>/<subject>/<chapter>/<topic>/<subtopic>.{md,txt,pdf}`.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use tutordb_core::types::Coordinate;

const EXTENSIONS: [&str; 3] = ["md", "txt", "pdf"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub coordinate: Coordinate,
    pub source_name: String,
}

/// Files sorted by path; anything not exactly four levels deep or with an
/// unsupported extension is skipped.
pub fn discover(root: &Path) -> Vec<SourceFile> {
    let mut files: Vec<SourceFile> = WalkDir::new(root)
        .min_depth(4)
        .max_depth(4)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| source_file(root, e.path()))
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn source_file(root: &Path, path: &Path) -> Option<SourceFile> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel.parent()?.iter().filter_map(|p| p.to_str()).collect();
    let [subject, chapter, topic] = parts.as_slice() else { return None };
    let subtopic = path.file_stem()?.to_str()?;
    let coordinate = Coordinate::new(subject, chapter, topic, subtopic).ok()?;
    let source_name = path.file_name()?.to_string_lossy().into_owned();
    Some(SourceFile { path: path.to_path_buf(), coordinate, source_name })
}

/// First markdown H1 of a text file, else the file stem with separators
/// turned into spaces.
pub fn title_for(path: &Path, bytes: &[u8]) -> String {
    let is_text = !bytes.starts_with(b"%PDF");
    if is_text {
        if let Ok(text) = std::str::from_utf8(bytes) {
            let h1 = text.lines().find_map(|l| l.trim().strip_prefix("# ").map(str::trim));
            if let Some(h1) = h1.filter(|h| !h.is_empty()) {
                return h1.to_string();
            }
        }
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().replace(['-', '_'], " "))
        .unwrap_or_else(|| "Untitled".to_string())
}
