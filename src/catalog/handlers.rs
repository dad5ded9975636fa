use super::types::{ImageQuery, ListImage, MetaBody, MetaQuery, RatingBody};
use super::{CatalogError, png_meta, scanner};
use crate::AppState;
use crate::access::Viewer;
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use std::path::Path;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

pub(crate) fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"ok": false, "error": message}))).into_response()
}

pub(crate) fn catalog_error_response(error: &CatalogError) -> Response {
    match error {
        CatalogError::NotFound | CatalogError::InvalidPath => {
            json_error(StatusCode::NOT_FOUND, "File not found or invalid path")
        }
        other => json_error(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string()),
    }
}

/// List every visible image plus a folder summary.
///
/// Scan results are narrowed by the access filter first, then merged with
/// user-edited fields from the stores.
pub async fn list_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let viewer = Viewer::from_headers(&headers, &state.config.app.auth_secret);

    let records = match state.catalog.scan(state.config.catalog.scan_limit).await {
        Ok(records) => records,
        Err(e) => {
            error!("catalog scan failed: {}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    let root = state.catalog.root().await;
    let visible = state.access.filter_records(&viewer, records, &root).await;

    let folders = scanner::summarize_folders(&visible);
    let ratings = state.ratings.all().await;
    let metadata = state.meta_store.all().await;
    let prefix = format!("/{}", state.config.catalog.path_prefix.trim_matches('/'));

    let images: Vec<ListImage> = visible
        .iter()
        .map(|record| {
            let encoded = urlencoding::encode(&record.relative_path);
            let stored = metadata
                .get(&record.relative_path)
                .and_then(Value::as_object);
            let title = stored
                .and_then(|entry| entry.get("title"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let tags = stored
                .and_then(|entry| entry.get("tags"))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let modified = chrono::DateTime::<chrono::Utc>::from(record.modified_at);

            ListImage {
                filename: record.name.clone(),
                relpath: record.relative_path.clone(),
                folder: record.folder.clone(),
                size: record.size_bytes,
                mtime: modified.timestamp(),
                mtime_iso: modified.format("%Y-%m-%dT%H:%M:%S").to_string(),
                url: format!("{prefix}/image?filename={encoded}"),
                thumbnail_url: format!("{prefix}/image?filename={encoded}&size=thumb"),
                rating: ratings.get(&record.relative_path).copied(),
                title,
                tags,
            }
        })
        .collect();

    Json(json!({"ok": true, "images": images, "folders": folders})).into_response()
}

/// Serve one image, or its thumbnail with `size=thumb`. Thumbnail failures
/// fall back to the original file; access filtering applies either way.
pub async fn image_handler(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(filename) = query.filename.filter(|f| !f.is_empty()) else {
        return json_error(StatusCode::BAD_REQUEST, "Missing filename");
    };

    let source = match state.catalog.resolve_file(&filename).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    let viewer = Viewer::from_headers(&headers, &state.config.app.auth_secret);
    let root = state.catalog.root().await;
    if !state.access.permits(&viewer, &filename, &root).await {
        warn!(path = %filename, "image request denied by access filter");
        return json_error(StatusCode::FORBIDDEN, "Access denied");
    }

    if query.size.as_deref() == Some("thumb") {
        match state.catalog.thumbnail_for(&filename).await {
            Ok(thumb) => return serve_file(&thumb).await,
            Err(e) => {
                // Fall back to the full-size original rather than erroring.
                warn!("thumbnail generation failed for {}: {}", filename, e);
            }
        }
    }

    serve_file(&source).await
}

/// Stream a file with content type and cache headers.
pub(crate) async fn serve_file(path: &Path) -> Response {
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    match File::open(path).await {
        Ok(file) => {
            let metadata = match file.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR).into_response(),
            };

            let stream = ReaderStream::new(file);
            let body = Body::from_stream(stream);

            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, mime_type.parse().unwrap());
            headers.insert(
                header::CONTENT_LENGTH,
                metadata.len().to_string().parse().unwrap(),
            );
            headers.insert(header::CACHE_CONTROL, "public, max-age=86400".parse().unwrap());

            (StatusCode::OK, headers, body).into_response()
        }
        Err(e) => {
            error!("Failed to open file: {:?}, error: {}", path, e);
            json_error(StatusCode::NOT_FOUND, "File not found or invalid path")
        }
    }
}

/// Metadata for one image: extraction-derived fields from the file itself,
/// shallow-merged with stored user edits (stored wins).
pub async fn get_meta_handler(
    State(state): State<AppState>,
    Query(query): Query<MetaQuery>,
) -> Response {
    let Some(filename) = query.filename.filter(|f| !f.is_empty()) else {
        return json_error(StatusCode::BAD_REQUEST, "Missing filename");
    };

    let source = match state.catalog.resolve_file(&filename).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    let extracted = tokio::task::spawn_blocking(move || png_meta::extract_metadata(&source)).await;
    let mut merged = match extracted {
        Ok(Ok(meta)) => meta,
        Ok(Err(e)) => {
            // Unreadable metadata is a soft failure; the stored edits still
            // serve.
            debug!("metadata extraction failed for {}: {}", filename, e);
            Map::new()
        }
        Err(e) => {
            warn!("metadata extraction task failed: {}", e);
            Map::new()
        }
    };

    for (field, value) in state.meta_store.get(&filename).await {
        merged.insert(field, value);
    }

    Json(json!({"ok": true, "meta": merged})).into_response()
}

/// Merge user edits into the metadata store and write rating/title/tags back
/// into the image's text chunks (best effort; the store is authoritative).
pub async fn set_meta_handler(State(state): State<AppState>, Json(body): Json<MetaBody>) -> Response {
    if body.filename.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Missing filename");
    }
    let Some(partial) = body.meta.as_object() else {
        return json_error(StatusCode::BAD_REQUEST, "meta must be an object");
    };

    let source = match state.catalog.resolve_file(&body.filename).await {
        Ok(path) => path,
        Err(e) => return catalog_error_response(&e),
    };

    let merged = match state.meta_store.set(&body.filename, partial.clone()).await {
        Ok(merged) => merged,
        Err(e) => {
            error!("metadata store write failed: {}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    let chunks = png_meta::user_edit_chunks(&merged);
    if !chunks.is_empty() {
        let filename = body.filename.clone();
        let written =
            tokio::task::spawn_blocking(move || png_meta::write_text_chunks(&source, &chunks))
                .await;
        match written {
            Ok(Ok(true)) => debug!("wrote metadata chunks into {}", filename),
            Ok(Ok(false)) => debug!("{} is not a PNG, chunks not written", filename),
            Ok(Err(e)) => warn!("metadata write-back failed for {}: {}", filename, e),
            Err(e) => warn!("metadata write-back task failed: {}", e),
        }
    }

    Json(json!({"ok": true, "meta": merged})).into_response()
}

/// Persist a single rating.
pub async fn set_rating_handler(
    State(state): State<AppState>,
    Json(body): Json<RatingBody>,
) -> Response {
    if body.filename.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Missing or invalid filename/rating");
    }
    // Path sanitization only: ratings may outlive their file.
    if state.catalog.resolve_new(&body.filename).await.is_err() {
        return json_error(StatusCode::NOT_FOUND, "File not found or invalid path");
    }

    match state.ratings.set(&body.filename, body.rating).await {
        Ok(_) => Json(json!({"ok": true})).into_response(),
        Err(e) => {
            error!("ratings store write failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// All stored ratings as a flat `filename -> rating` map.
pub async fn ratings_handler(State(state): State<AppState>) -> Response {
    Json(state.ratings.all().await).into_response()
}
