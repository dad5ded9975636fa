//! Filesystem mutation endpoints: batch delete/download, rename, move,
//! folder management. Every client-supplied path goes through the traversal
//! guard before any filesystem operation, and rename/move re-key the
//! metadata and rating stores so user edits follow the file.

use super::handlers::{catalog_error_response, json_error};
use super::scanner::THUMBS_DIR;
use super::types::{
    BatchDeleteBody, BatchDownloadQuery, FileBody, FolderBody, MoveFileBody, MoveFolderBody,
    RenameFileBody, RenameFolderBody,
};
use super::CatalogError;
use crate::AppState;
use crate::access::Viewer;
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, warn};

/// A bare filename segment for rename targets: no separators, no traversal.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && name != "." && name != ".."
}

fn parent_of(relative: &str) -> Option<&str> {
    relative.rsplit_once('/').map(|(parent, _)| parent)
}

fn basename_of(relative: &str) -> &str {
    relative.rsplit_once('/').map_or(relative, |(_, name)| name)
}

pub async fn batch_delete_handler(
    State(state): State<AppState>,
    Json(body): Json<BatchDeleteBody>,
) -> Response {
    let mut deleted = Vec::new();
    let mut errors = Vec::new();

    for filename in &body.filenames {
        let path = match state.catalog.resolve_file(filename).await {
            Ok(path) => path,
            Err(_) => {
                errors.push(json!({
                    "filename": filename,
                    "error": "File not found or invalid path",
                }));
                continue;
            }
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                state.catalog.remove_thumbnail(filename).await;
                deleted.push(filename.clone());
            }
            Err(e) => errors.push(json!({"filename": filename, "error": e.to_string()})),
        }
    }

    Json(json!({
        "ok": true,
        "deleted": deleted,
        "errors": errors,
        "count": deleted.len(),
    }))
    .into_response()
}

/// Stream the requested files as one ZIP archive. The access filter applies
/// the same way as on the listing path.
pub async fn batch_download_handler(
    State(state): State<AppState>,
    Query(query): Query<BatchDownloadQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(raw) = query.filenames.filter(|f| !f.is_empty()) else {
        return json_error(StatusCode::BAD_REQUEST, "Missing filenames");
    };
    let requested: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if requested.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Missing filenames");
    }

    let viewer = Viewer::from_headers(&headers, &state.config.app.auth_secret);
    let root = state.catalog.root().await;
    let permitted = state.access.filter_paths(&viewer, requested, &root).await;

    let mut entries: Vec<(String, PathBuf)> = Vec::with_capacity(permitted.len());
    for name in permitted {
        if let Ok(path) = state.catalog.resolve_file(&name).await {
            entries.push((name, path));
        }
    }
    if entries.is_empty() {
        return json_error(StatusCode::NOT_FOUND, "No files available");
    }

    let archive = match tokio::task::spawn_blocking(move || build_zip(&entries)).await {
        Ok(Ok(archive)) => archive,
        Ok(Err(e)) => {
            error!("zip archive build failed: {}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
        Err(e) => {
            error!("zip archive task failed: {}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, "application/zip".parse().unwrap());
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        "attachment; filename=\"images.zip\"".parse().unwrap(),
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        archive.len().to_string().parse().unwrap(),
    );

    (StatusCode::OK, response_headers, Body::from(archive)).into_response()
}

fn build_zip(entries: &[(String, PathBuf)]) -> Result<Vec<u8>, CatalogError> {
    use std::io::Cursor;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (name, path) in entries {
        writer
            .start_file(name.as_str(), options)
            .map_err(std::io::Error::from)?;
        let mut file = std::fs::File::open(path)?;
        std::io::copy(&mut file, &mut writer)?;
    }

    let cursor = writer.finish().map_err(std::io::Error::from)?;
    Ok(cursor.into_inner())
}

/// Rename a file within its folder, carrying metadata and rating keys along.
pub async fn rename_file_handler(
    State(state): State<AppState>,
    Json(body): Json<RenameFileBody>,
) -> Response {
    if !is_valid_name(&body.new_name) {
        return json_error(StatusCode::BAD_REQUEST, "Invalid new name");
    }

    let source = match state.catalog.resolve_file(&body.filename).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    let new_relative = match parent_of(&body.filename) {
        Some(parent) => format!("{parent}/{}", body.new_name),
        None => body.new_name.clone(),
    };
    let destination = match state.catalog.resolve_new(&new_relative).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };
    if destination.exists() {
        return json_error(StatusCode::BAD_REQUEST, "Target already exists");
    }

    if let Err(e) = tokio::fs::rename(&source, &destination).await {
        error!("rename failed: {}", e);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    rekey_file(&state, &body.filename, &new_relative).await;
    Json(json!({"ok": true, "filename": new_relative})).into_response()
}

/// Move a file into another folder (empty target means the root).
pub async fn move_file_handler(
    State(state): State<AppState>,
    Json(body): Json<MoveFileBody>,
) -> Response {
    let source = match state.catalog.resolve_file(&body.filename).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    let name = basename_of(&body.filename);
    let target = body.target_folder.trim_matches('/');
    let new_relative = if target.is_empty() {
        name.to_string()
    } else {
        format!("{target}/{name}")
    };
    if new_relative == body.filename {
        return Json(json!({"ok": true, "filename": new_relative})).into_response();
    }

    let destination = match state.catalog.resolve_new(&new_relative).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };
    if destination.exists() {
        return json_error(StatusCode::BAD_REQUEST, "Target already exists");
    }
    if let Some(parent) = destination.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        error!("could not create target folder: {}", e);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    if let Err(e) = tokio::fs::rename(&source, &destination).await {
        error!("move failed: {}", e);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    rekey_file(&state, &body.filename, &new_relative).await;
    Json(json!({"ok": true, "filename": new_relative})).into_response()
}

pub async fn rename_folder_handler(
    State(state): State<AppState>,
    Json(body): Json<RenameFolderBody>,
) -> Response {
    if body.folder.is_empty() || !is_valid_name(&body.new_name) {
        return json_error(StatusCode::BAD_REQUEST, "Invalid folder or new name");
    }

    let source = match state.catalog.resolve_dir(&body.folder).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    let new_relative = match parent_of(&body.folder) {
        Some(parent) => format!("{parent}/{}", body.new_name),
        None => body.new_name.clone(),
    };
    let destination = match state.catalog.resolve_new(&new_relative).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };
    if destination.exists() {
        return json_error(StatusCode::BAD_REQUEST, "Target already exists");
    }

    if let Err(e) = tokio::fs::rename(&source, &destination).await {
        error!("folder rename failed: {}", e);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    rekey_folder(&state, &body.folder, &new_relative).await;
    Json(json!({"ok": true, "folder": new_relative})).into_response()
}

pub async fn move_folder_handler(
    State(state): State<AppState>,
    Json(body): Json<MoveFolderBody>,
) -> Response {
    if body.folder.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Invalid folder");
    }
    let folder = body.folder.trim_matches('/');
    let target = body.target_folder.trim_matches('/');
    if target == folder || target.starts_with(&format!("{folder}/")) {
        return json_error(StatusCode::BAD_REQUEST, "Cannot move a folder into itself");
    }

    let source = match state.catalog.resolve_dir(folder).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    let name = basename_of(folder);
    let new_relative = if target.is_empty() {
        name.to_string()
    } else {
        format!("{target}/{name}")
    };
    if new_relative == folder {
        return Json(json!({"ok": true, "folder": new_relative})).into_response();
    }

    let destination = match state.catalog.resolve_new(&new_relative).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };
    if destination.exists() {
        return json_error(StatusCode::BAD_REQUEST, "Target already exists");
    }
    if let Some(parent) = destination.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        error!("could not create target folder: {}", e);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    if let Err(e) = tokio::fs::rename(&source, &destination).await {
        error!("folder move failed: {}", e);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    rekey_folder(&state, folder, &new_relative).await;
    Json(json!({"ok": true, "folder": new_relative})).into_response()
}

pub async fn create_folder_handler(
    State(state): State<AppState>,
    Json(body): Json<FolderBody>,
) -> Response {
    if body.folder.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Invalid folder");
    }
    let path = match state.catalog.resolve_new(&body.folder).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };
    if path.exists() {
        return json_error(StatusCode::BAD_REQUEST, "Folder already exists");
    }

    match tokio::fs::create_dir_all(&path).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => {
            error!("create folder failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

pub async fn delete_folder_handler(
    State(state): State<AppState>,
    Json(body): Json<FolderBody>,
) -> Response {
    let folder = body.folder.trim_matches('/');
    if folder.is_empty() || folder == THUMBS_DIR {
        return json_error(StatusCode::BAD_REQUEST, "Invalid folder");
    }

    let path = match state.catalog.resolve_dir(folder).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    match tokio::fs::remove_dir_all(&path).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => {
            error!("delete folder failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

pub async fn delete_file_handler(
    State(state): State<AppState>,
    Json(body): Json<FileBody>,
) -> Response {
    let path = match state.catalog.resolve_file(&body.filename).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            state.catalog.remove_thumbnail(&body.filename).await;
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => {
            error!("delete file failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// Move metadata and rating keys after a successful file rename/move. The
/// file has already moved, so store failures are logged rather than undone.
async fn rekey_file(state: &AppState, old_relative: &str, new_relative: &str) {
    if let Err(e) = state.meta_store.rename_key(old_relative, new_relative).await {
        warn!("metadata re-key failed for {}: {}", old_relative, e);
    }
    if let Err(e) = state.ratings.rename_key(old_relative, new_relative).await {
        warn!("rating re-key failed for {}: {}", old_relative, e);
    }
    // The thumbnail key depends on the relative path; drop the stale one.
    state.catalog.remove_thumbnail(old_relative).await;
}

async fn rekey_folder(state: &AppState, old_folder: &str, new_folder: &str) {
    if let Err(e) = state.meta_store.rename_prefix(old_folder, new_folder).await {
        warn!("metadata re-key failed for folder {}: {}", old_folder, e);
    }
    if let Err(e) = state.ratings.rename_prefix(old_folder, new_folder).await {
        warn!("rating re-key failed for folder {}: {}", old_folder, e);
    }
}
