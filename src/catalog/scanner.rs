use super::types::{FolderSummary, ImageRecord};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

/// Reserved subdirectory under the catalog root holding derived thumbnails.
pub const THUMBS_DIR: &str = "_thumbs";

/// Recursively enumerate image files under `root`, newest first.
///
/// The thumbnail directory and anything matching the hashed thumbnail naming
/// convention are excluded. Files that vanish between enumeration and stat
/// (concurrent writers) are skipped silently.
pub fn scan(root: &Path, extensions: &HashSet<String>, limit: Option<usize>) -> Vec<ImageRecord> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut records = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && entry.file_name() == THUMBS_DIR));

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !has_tracked_extension(name, extensions) || is_thumbnail_name(name) {
            continue;
        }

        // Stat race with concurrent writers is a recoverable condition.
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let folder = match relative_path.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        };

        records.push(ImageRecord {
            name: name.to_string(),
            relative_path,
            folder,
            size_bytes: metadata.len(),
            modified_at: metadata.modified().unwrap_or(UNIX_EPOCH),
        });
    }

    // Newest first; stable on discovery order for ties.
    records.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));

    if let Some(limit) = limit {
        records.truncate(limit);
    }

    debug!("scan found {} images under {:?}", records.len(), root);
    records
}

/// Derive the folder summary list for the `/list` payload: root first, then
/// lexicographic.
pub fn summarize_folders(records: &[ImageRecord]) -> Vec<FolderSummary> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.folder.as_str()).or_default() += 1;
    }

    let mut folders: Vec<FolderSummary> = counts
        .into_iter()
        .map(|(path, count)| FolderSummary {
            path: path.to_string(),
            name: if path.is_empty() {
                "Output".to_string()
            } else {
                path.to_string()
            },
            count,
        })
        .collect();

    folders.sort_by(|a, b| {
        (!a.path.is_empty())
            .cmp(&!b.path.is_empty())
            .then_with(|| a.path.cmp(&b.path))
    });
    folders
}

pub(crate) fn has_tracked_extension(name: &str, extensions: &HashSet<String>) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_ascii_lowercase()))
        .unwrap_or(false)
}

/// Defensive double-filter against thumbnail artifacts that somehow escaped
/// the reserved directory: hashed thumbnail names are 16 lowercase hex chars.
fn is_thumbnail_name(name: &str) -> bool {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| {
            stem.len() == 16
                && stem
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        })
}
