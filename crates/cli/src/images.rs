//! Firmware image directory listing

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File extension of firmware images
const IMAGE_EXTENSION: &str = "bin";

#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Folder { sub_files: usize },
    File { size_mb: f64 },
}

/// One visible entry of a directory
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

impl DirEntry {
    /// Whether this entry looks like a firmware image
    pub fn is_firmware_image(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
            && self
                .path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(IMAGE_EXTENSION))
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// List the non-hidden entries of `dir`, folders first, each group by name
pub fn list_directory(dir: &Path) -> Result<Vec<DirEntry>> {
    let read = fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut entries = Vec::new();
    for entry in read {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }

        let path = entry.path();
        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        let kind = if metadata.is_dir() {
            let sub_files = fs::read_dir(&path)
                .map(|children| {
                    children
                        .filter_map(|c| c.ok())
                        .filter(|c| !is_hidden(&c.file_name().to_string_lossy()))
                        .count()
                })
                .unwrap_or(0);
            EntryKind::Folder { sub_files }
        } else {
            EntryKind::File {
                size_mb: metadata.len() as f64 / (1024.0 * 1024.0),
            }
        };

        entries.push(DirEntry { name, path, kind });
    }

    entries.sort_by(|a, b| {
        let a_file = matches!(a.kind, EntryKind::File { .. });
        let b_file = matches!(b.kind, EntryKind::File { .. });
        a_file.cmp(&b_file).then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}
