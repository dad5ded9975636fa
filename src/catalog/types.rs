use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One catalogued file, constructed transiently on each scan. The scanner is
/// the sole producer; everything downstream treats records as immutable.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    /// Base filename, e.g. "image.png".
    pub name: String,
    /// Path relative to the catalog root, forward-slash normalized. Unique
    /// key within one scan.
    pub relative_path: String,
    /// Parent directory of `relative_path`, empty string for root files.
    pub folder: String,
    pub size_bytes: u64,
    pub modified_at: SystemTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderSummary {
    pub path: String,
    pub name: String,
    pub count: usize,
}

/// Wire shape of one image in the `/list` payload: the scan record plus
/// serving URLs and user-edited fields merged from the stores.
#[derive(Debug, Clone, Serialize)]
pub struct ListImage {
    pub filename: String,
    pub relpath: String,
    pub folder: String,
    pub size: u64,
    pub mtime: i64,
    pub mtime_iso: String,
    pub url: String,
    pub thumbnail_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ImageQuery {
    pub filename: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaBody {
    pub filename: String,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatingBody {
    pub filename: String,
    pub rating: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchDeleteBody {
    pub filenames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchDownloadQuery {
    pub filenames: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameFileBody {
    pub filename: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameFolderBody {
    pub folder: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveFileBody {
    pub filename: String,
    pub target_folder: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveFolderBody {
    pub folder: String,
    pub target_folder: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderBody {
    pub folder: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileBody {
    pub filename: String,
}
