// JSON-document persistence for per-image user edits and ratings.
//
// Both stores load the whole document on each read and rewrite it whole on
// each write (temp file + atomic rename, so readers never observe a partial
// document). There is no writer locking: concurrent writers race and the last
// one wins. That is an accepted limitation for a single-user tool, not a bug.

use crate::catalog::CatalogError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const METADATA_FILE: &str = "metadata.json";
const RATINGS_FILE: &str = "ratings.json";

pub const RATING_MIN: i64 = 0;
pub const RATING_MAX: i64 = 5;

/// Free-form per-image records keyed by relative path. `set` shallow-merges,
/// overwriting only the provided fields.
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(METADATA_FILE),
        }
    }

    pub async fn get(&self, key: &str) -> Map<String, Value> {
        let doc = self.load().await;
        match doc.get(key) {
            Some(Value::Object(record)) => record.clone(),
            _ => Map::new(),
        }
    }

    pub async fn all(&self) -> Map<String, Value> {
        self.load().await
    }

    /// Merge `partial` into the record for `key` and persist. Returns the
    /// merged record. Ratings are clamped on the way in.
    pub async fn set(
        &self,
        key: &str,
        partial: Map<String, Value>,
    ) -> Result<Map<String, Value>, CatalogError> {
        let mut doc = self.load().await;
        let mut record = match doc.get(key) {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };

        for (field, value) in partial {
            if field == "rating" {
                record.insert(field, Value::from(clamp_rating_value(&value)));
            } else {
                record.insert(field, value);
            }
        }

        doc.insert(key.to_string(), Value::Object(record.clone()));
        write_json_atomic(&self.path, &doc).await?;
        Ok(record)
    }

    /// Move the record for `old_key` to `new_key`, leaving everything else
    /// untouched. No-op when `old_key` has no record.
    pub async fn rename_key(&self, old_key: &str, new_key: &str) -> Result<(), CatalogError> {
        let mut doc = self.load().await;
        if let Some(record) = doc.remove(old_key) {
            doc.insert(new_key.to_string(), record);
            write_json_atomic(&self.path, &doc).await?;
        }
        Ok(())
    }

    /// Re-key every record under `old_folder/` to `new_folder/` after a
    /// folder rename or move.
    pub async fn rename_prefix(
        &self,
        old_folder: &str,
        new_folder: &str,
    ) -> Result<(), CatalogError> {
        let doc = self.load().await;
        let rekeyed = rekey_prefix(doc, old_folder, new_folder);
        write_json_atomic(&self.path, &rekeyed).await?;
        Ok(())
    }

    async fn load(&self) -> Map<String, Value> {
        load_json_object(&self.path).await
    }
}

/// Flat `relative path -> rating` map persisted separately from the free-form
/// metadata document.
pub struct RatingsStore {
    path: PathBuf,
}

impl RatingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(RATINGS_FILE),
        }
    }

    pub async fn set(&self, key: &str, rating: i64) -> Result<i64, CatalogError> {
        let clamped = rating.clamp(RATING_MIN, RATING_MAX);
        let mut doc = self.load().await;
        doc.insert(key.to_string(), Value::from(clamped));
        write_json_atomic(&self.path, &doc).await?;
        Ok(clamped)
    }

    pub async fn all(&self) -> HashMap<String, i64> {
        self.load()
            .await
            .into_iter()
            .filter_map(|(key, value)| value.as_i64().map(|rating| (key, rating)))
            .collect()
    }

    pub async fn rename_key(&self, old_key: &str, new_key: &str) -> Result<(), CatalogError> {
        let mut doc = self.load().await;
        if let Some(rating) = doc.remove(old_key) {
            doc.insert(new_key.to_string(), rating);
            write_json_atomic(&self.path, &doc).await?;
        }
        Ok(())
    }

    pub async fn rename_prefix(
        &self,
        old_folder: &str,
        new_folder: &str,
    ) -> Result<(), CatalogError> {
        let doc = self.load().await;
        let rekeyed = rekey_prefix(doc, old_folder, new_folder);
        write_json_atomic(&self.path, &rekeyed).await?;
        Ok(())
    }

    async fn load(&self) -> Map<String, Value> {
        load_json_object(&self.path).await
    }
}

fn clamp_rating_value(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .unwrap_or(0)
        .clamp(RATING_MIN, RATING_MAX)
}

fn rekey_prefix(doc: Map<String, Value>, old_folder: &str, new_folder: &str) -> Map<String, Value> {
    let old_prefix = format!("{}/", old_folder.trim_end_matches('/'));
    let new_prefix = format!("{}/", new_folder.trim_end_matches('/'));

    doc.into_iter()
        .map(|(key, value)| match key.strip_prefix(&old_prefix) {
            Some(rest) => (format!("{new_prefix}{rest}"), value),
            None => (key, value),
        })
        .collect()
}

/// Load a JSON object document, treating a missing, unreadable, or corrupt
/// file as empty.
async fn load_json_object(path: &Path) -> Map<String, Value> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(_) => return Map::new(),
    };
    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(doc)) => doc,
        Ok(_) | Err(_) => {
            warn!("ignoring corrupt JSON document at {:?}", path);
            Map::new()
        }
    }
}

/// Write a JSON document via a temp file in the same directory followed by an
/// atomic rename, so a reader never sees a partially-written document.
pub(crate) async fn write_json_atomic(
    path: &Path,
    value: &impl Serialize,
) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Move data files from the old layout (directly under the catalog root) into
/// the private data directory. Files already present in the data directory
/// are never overwritten.
pub async fn migrate_legacy_layout(data_dir: &Path, root: &Path) {
    for name in ["settings.json", METADATA_FILE, RATINGS_FILE] {
        let legacy = root.join(name);
        let target = data_dir.join(name);
        if target.exists() || !legacy.is_file() {
            continue;
        }
        if let Err(e) = tokio::fs::create_dir_all(data_dir).await {
            warn!("could not create data directory {:?}: {}", data_dir, e);
            return;
        }
        match tokio::fs::rename(&legacy, &target).await {
            Ok(()) => info!("migrated {} from catalog root to {:?}", name, data_dir),
            Err(e) => debug!("legacy migration of {} skipped: {}", name, e),
        }
    }
}
