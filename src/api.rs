//! Settings, watcher status, and the frontend log sink.

use crate::AppState;
use crate::catalog::json_error;
use crate::settings::SettingsUpdate;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

const LOG_FILE: &str = "gallery.log";

pub async fn get_settings_handler(State(state): State<AppState>) -> Response {
    Json(json!({"ok": true, "settings": state.settings.get().await})).into_response()
}

/// Persist a settings update and apply watcher-relevant changes immediately:
/// the tracked extension set, the polling mode, and the watched root.
pub async fn update_settings_handler(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    let before = state.settings.get().await;

    let updated = match state.settings.apply(update).await {
        Ok(updated) => updated,
        Err(e) => {
            error!("settings update failed: {}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    state
        .notifier
        .update_extensions(updated.tracked_extensions.iter().cloned().collect())
        .await;
    if let Err(e) = state.notifier.update_polling(updated.use_polling).await {
        // Monitoring degradation is reported, never fatal.
        warn!("could not switch watcher polling mode: {}", e);
    }
    if before.custom_root != updated.custom_root {
        let root = state.catalog.root().await;
        if let Err(e) = state.notifier.rewatch(&root).await {
            warn!("could not rewatch new catalog root: {}", e);
        }
    }

    Json(json!({"ok": true, "settings": updated})).into_response()
}

/// Poll-based monitoring status; there is no push channel.
pub async fn watch_status_handler(State(state): State<AppState>) -> Response {
    Json(json!({"ok": true, "monitoring": state.notifier.is_running().await})).into_response()
}

/// Log sink for the web UI: appends a JSON line to `gallery.log` in the data
/// directory and mirrors WARN/ERROR to the server log. Failures are swallowed.
pub async fn frontend_log_handler(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Response {
    let level = payload
        .get("level")
        .and_then(Value::as_str)
        .unwrap_or("INFO")
        .to_ascii_uppercase();
    let source = payload
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("frontend");
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let entry = json!({
        "ts": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": level,
        "source": source,
        "message": message,
        "extra": payload.get("extra").cloned().unwrap_or(Value::Null),
    });

    if matches!(level.as_str(), "WARN" | "ERROR") {
        warn!(source = %source, "{}", message);
    }

    let log_path = state.config.catalog.data_directory.join(LOG_FILE);
    let result = async {
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .await?;
        file.write_all(format!("{entry}\n").as_bytes()).await
    }
    .await;
    if let Err(e) = result {
        warn!("failed to append frontend log entry: {}", e);
    }

    Json(json!({"ok": true})).into_response()
}
