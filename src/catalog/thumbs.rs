use super::scanner::THUMBS_DIR;
use super::{Catalog, CatalogError, SharedCatalog};
use image::codecs::png::PngEncoder;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

/// Thumbnail generation works in small batches with a short yield in between
/// so a large backlog never starves the event loop.
const PREGEN_BATCH: usize = 5;
const PREGEN_PAUSE: Duration = Duration::from_millis(50);

impl Catalog {
    /// Cache filename for a source image. Nested relative paths are hashed so
    /// that same-named files in different folders cannot collide; bare
    /// root-level filenames keep their name (backward-compatible fast path).
    pub fn thumbnail_name(relative_path: &str) -> String {
        if relative_path.contains('/') {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(relative_path.as_bytes());
            let digest = format!("{:x}", hasher.finalize());
            let extension = Path::new(relative_path)
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("png");
            format!("{}.{}", &digest[..16], extension)
        } else {
            relative_path.to_string()
        }
    }

    /// Return the path of a fresh thumbnail for `relative_path`, regenerating
    /// it when missing or older than the source. Callers fall back to the
    /// original file when this fails.
    pub async fn thumbnail_for(&self, relative_path: &str) -> Result<PathBuf, CatalogError> {
        let source = self.resolve_file(relative_path).await?;
        let thumbs_dir = self.root().await.join(THUMBS_DIR);
        let thumb_path = thumbs_dir.join(Self::thumbnail_name(relative_path));

        if is_thumbnail_fresh(&thumb_path, &source).await {
            return Ok(thumb_path);
        }

        tokio::fs::create_dir_all(&thumbs_dir).await?;

        // Decode/resize/encode is CPU work; keep it off the event loop.
        // Concurrent requests may race to regenerate the same thumbnail, which
        // wastes a little work but produces identical output.
        let max_edge = self.config.thumbnail_max_edge;
        let destination = thumb_path.clone();
        tokio::task::spawn_blocking(move || generate_thumbnail(&source, &destination, max_edge))
            .await??;

        debug!("regenerated thumbnail for {}", relative_path);
        Ok(thumb_path)
    }

    /// Remove the cached thumbnail for a source path, ignoring absence.
    pub async fn remove_thumbnail(&self, relative_path: &str) {
        let thumb = self
            .root()
            .await
            .join(THUMBS_DIR)
            .join(Self::thumbnail_name(relative_path));
        let _ = tokio::fs::remove_file(thumb).await;
    }

    /// Walk the catalog and generate any missing or stale thumbnails.
    pub async fn pregenerate_thumbnails(&self) -> Result<usize, CatalogError> {
        let records = self.scan(None).await?;
        let mut generated = 0;

        for batch in records.chunks(PREGEN_BATCH) {
            for record in batch {
                match self.thumbnail_for(&record.relative_path).await {
                    Ok(_) => generated += 1,
                    Err(e) => debug!(
                        "thumbnail pregeneration skipped {}: {}",
                        record.relative_path, e
                    ),
                }
            }
            tokio::time::sleep(PREGEN_PAUSE).await;
        }

        Ok(generated)
    }

    pub fn start_background_pregeneration(catalog: SharedCatalog) {
        tokio::spawn(async move {
            match catalog.pregenerate_thumbnails().await {
                Ok(count) => info!("thumbnail pregeneration complete: {} thumbnails", count),
                Err(e) => error!("thumbnail pregeneration failed: {}", e),
            }
        });
    }
}

/// A cached thumbnail is fresh when it exists and is at least as new as its
/// source.
async fn is_thumbnail_fresh(thumb_path: &Path, source: &Path) -> bool {
    let Ok(thumb_metadata) = tokio::fs::metadata(thumb_path).await else {
        return false;
    };
    let Ok(source_metadata) = tokio::fs::metadata(source).await else {
        return false;
    };
    matches!(
        (thumb_metadata.modified(), source_metadata.modified()),
        (Ok(thumb_modified), Ok(source_modified)) if thumb_modified >= source_modified
    )
}

/// Resize preserving aspect ratio with the longest edge capped, re-encoding
/// as PNG regardless of the source format.
fn generate_thumbnail(source: &Path, destination: &Path, max_edge: u32) -> Result<(), CatalogError> {
    let img = image::open(source)?;
    let thumbnail = img.thumbnail(max_edge, max_edge);
    let output = std::fs::File::create(destination)?;
    let encoder = PngEncoder::new(output);
    thumbnail.write_with_encoder(encoder)?;
    Ok(())
}
