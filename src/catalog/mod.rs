// Catalog module - directory scanning, thumbnails, and the HTTP read/write surface
mod error;
mod handlers;
mod ops;
pub mod png_meta;
mod scanner;
mod thumbs;
mod types;

pub use error::CatalogError;
pub use handlers::{
    get_meta_handler, image_handler, list_handler, ratings_handler, set_meta_handler,
    set_rating_handler,
};
pub(crate) use handlers::json_error;
pub use ops::{
    batch_delete_handler, batch_download_handler, create_folder_handler, delete_file_handler,
    delete_folder_handler, move_file_handler, move_folder_handler, rename_file_handler,
    rename_folder_handler,
};
pub use scanner::{THUMBS_DIR, summarize_folders};
pub use types::*;

use crate::settings::SettingsStore;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

pub type SharedCatalog = Arc<Catalog>;

pub struct Catalog {
    pub(crate) config: crate::CatalogConfig,
    pub(crate) settings: Arc<SettingsStore>,
}

impl Catalog {
    pub fn new(config: crate::CatalogConfig, settings: Arc<SettingsStore>) -> Self {
        Self { config, settings }
    }

    /// Catalog root, honoring a persisted custom root override.
    pub async fn root(&self) -> PathBuf {
        self.settings
            .get()
            .await
            .custom_root
            .unwrap_or_else(|| self.config.source_directory.clone())
    }

    pub async fn extensions(&self) -> HashSet<String> {
        self.settings.extension_set().await
    }

    /// Enumerate the catalog, newest first. The walk itself is blocking work
    /// and runs off the event loop.
    pub async fn scan(&self, limit: Option<usize>) -> Result<Vec<ImageRecord>, CatalogError> {
        let root = self.root().await;
        let extensions = self.extensions().await;
        let records =
            tokio::task::spawn_blocking(move || scanner::scan(&root, &extensions, limit)).await?;
        Ok(records)
    }

    /// Resolve a client-supplied relative path to an existing regular file
    /// inside the catalog root.
    pub async fn resolve_file(&self, relative: &str) -> Result<PathBuf, CatalogError> {
        let root = self.root().await;
        let path = sanitize_relative(&root, relative)?;
        if path == root {
            return Err(CatalogError::InvalidPath);
        }
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| CatalogError::NotFound)?;
        if !metadata.is_file() {
            return Err(CatalogError::NotFound);
        }
        Ok(path)
    }

    /// Resolve a client-supplied relative path to an existing directory.
    pub async fn resolve_dir(&self, relative: &str) -> Result<PathBuf, CatalogError> {
        let root = self.root().await;
        let path = sanitize_relative(&root, relative)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| CatalogError::NotFound)?;
        if !metadata.is_dir() {
            return Err(CatalogError::NotFound);
        }
        Ok(path)
    }

    /// Sanitize a relative path without requiring it to exist (rename/move
    /// destinations, folders to create).
    pub async fn resolve_new(&self, relative: &str) -> Result<PathBuf, CatalogError> {
        let root = self.root().await;
        sanitize_relative(&root, relative)
    }
}

/// Join a client-supplied relative path onto `root`, rejecting anything that
/// could escape it. Only plain path components survive; `..`, absolute paths,
/// and prefix components are refused outright.
pub(crate) fn sanitize_relative(root: &Path, requested: &str) -> Result<PathBuf, CatalogError> {
    let requested = requested.trim();
    let relative = Path::new(requested);
    if relative.is_absolute() {
        return Err(CatalogError::InvalidPath);
    }

    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(CatalogError::InvalidPath),
        }
    }

    Ok(root.join(clean))
}
