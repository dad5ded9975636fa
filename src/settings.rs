//! Persisted user settings: tracked extensions, watcher polling mode, and an
//! optional custom catalog root. Stored as one JSON document in the data
//! directory with the same atomic-rename discipline as the stores.

use crate::catalog::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;

const SETTINGS_FILE: &str = "settings.json";

pub fn default_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "webp", "bmp"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_extensions")]
    pub tracked_extensions: Vec<String>,
    #[serde(default)]
    pub use_polling: bool,
    #[serde(default)]
    pub custom_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracked_extensions: default_extensions(),
            use_polling: false,
            custom_root: None,
        }
    }
}

/// Partial update as posted by the client; absent fields keep their value.
/// An empty-string `custom_root` clears the override.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SettingsUpdate {
    pub tracked_extensions: Option<Vec<String>>,
    pub use_polling: Option<bool>,
    pub custom_root: Option<String>,
}

pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Load persisted settings, falling back to defaults on a missing or
    /// corrupt document.
    pub async fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(json) => match serde_json::from_str::<Settings>(&json) {
                Ok(settings) => normalize(settings),
                Err(e) => {
                    warn!("ignoring corrupt settings document: {}", e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };

        Self {
            path,
            current: RwLock::new(current),
        }
    }

    pub async fn get(&self) -> Settings {
        self.current.read().await.clone()
    }

    pub async fn extension_set(&self) -> HashSet<String> {
        self.current
            .read()
            .await
            .tracked_extensions
            .iter()
            .cloned()
            .collect()
    }

    /// Apply a partial update, persist, and return the new settings.
    pub async fn apply(&self, update: SettingsUpdate) -> Result<Settings, CatalogError> {
        let mut guard = self.current.write().await;
        let mut next = guard.clone();

        if let Some(extensions) = update.tracked_extensions {
            next.tracked_extensions = extensions;
        }
        if let Some(use_polling) = update.use_polling {
            next.use_polling = use_polling;
        }
        if let Some(custom_root) = update.custom_root {
            let trimmed = custom_root.trim();
            next.custom_root = if trimmed.is_empty() {
                None
            } else {
                Some(PathBuf::from(trimmed))
            };
        }

        let next = normalize(next);
        crate::store::write_json_atomic(&self.path, &next).await?;
        *guard = next.clone();
        Ok(next)
    }
}

fn normalize(mut settings: Settings) -> Settings {
    let mut seen = HashSet::new();
    settings.tracked_extensions = settings
        .tracked_extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && seen.insert(ext.clone()))
        .collect();
    if settings.tracked_extensions.is_empty() {
        settings.tracked_extensions = default_extensions();
    }
    settings
}
