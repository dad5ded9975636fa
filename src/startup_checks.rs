use crate::Config;
use crate::catalog::THUMBS_DIR;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("Failed to create data directory: {0}")]
    DataDirectoryCreationFailed(std::io::Error),

    #[error("Catalog source directory does not exist: {0}")]
    SourceDirectoryMissing(String),

    #[error("Failed to create thumbnail directory: {0}")]
    ThumbnailDirectoryCreationFailed(std::io::Error),
}

pub async fn perform_startup_checks(config: &Config) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();

    info!("Performing startup checks...");

    let data_dir = &config.catalog.data_directory;
    if !data_dir.exists() {
        info!("Data directory does not exist, creating: {:?}", data_dir);
        if let Err(e) = tokio::fs::create_dir_all(data_dir).await {
            error!("Failed to create data directory: {}", e);
            errors.push(StartupCheckError::DataDirectoryCreationFailed(e));
        }
    } else {
        info!("Data directory exists: {:?}", data_dir);
    }

    let source_dir = &config.catalog.source_directory;
    if !source_dir.exists() {
        error!("Catalog source directory does not exist: {:?}", source_dir);
        errors.push(StartupCheckError::SourceDirectoryMissing(
            source_dir.display().to_string(),
        ));
    } else {
        info!("Catalog source directory exists: {:?}", source_dir);

        let thumbs_dir = source_dir.join(THUMBS_DIR);
        if !thumbs_dir.exists() {
            if let Err(e) = tokio::fs::create_dir_all(&thumbs_dir).await {
                warn!("Failed to create thumbnail directory: {}", e);
                errors.push(StartupCheckError::ThumbnailDirectoryCreationFailed(e));
            } else {
                info!("Thumbnail directory created: {:?}", thumbs_dir);
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
