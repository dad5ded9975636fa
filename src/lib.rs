use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod access;
pub mod api;
pub mod catalog;
pub mod notifier;
pub mod settings;
pub mod startup_checks;
pub mod store;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub catalog: CatalogConfig,
    pub access: AccessConfig,
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    /// HMAC key for the signed viewer cookie. Only verified, never issued
    /// by this server.
    pub auth_secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    pub path_prefix: String,
    pub source_directory: PathBuf,
    pub data_directory: PathBuf,
    pub thumbnail_max_edge: u32,
    #[serde(default)]
    pub pregenerate_thumbnails: bool,
    #[serde(default)]
    pub scan_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessConfig {
    pub content_cache_capacity: u64,
    pub content_cache_ttl_secs: u64,
    pub request_cache_capacity: u64,
    pub request_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            app: AppConfig {
                name: "Gashu".to_string(),
                log_level: "info".to_string(),
                auth_secret: "change-me-in-production".to_string(),
                base_url: None,
            },
            catalog: CatalogConfig {
                path_prefix: "gallery".to_string(),
                source_directory: PathBuf::from("output"),
                data_directory: PathBuf::from("data"),
                thumbnail_max_edge: 256,
                pregenerate_thumbnails: false,
                scan_limit: None,
            },
            access: AccessConfig {
                content_cache_capacity: 4096,
                content_cache_ttl_secs: 3600,
                request_cache_capacity: 256,
                request_cache_ttl_secs: 60,
            },
            watcher: WatcherConfig {
                enabled: true,
                poll_interval_secs: 1,
            },
        }
    }
}

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub catalog: catalog::SharedCatalog,
    pub meta_store: Arc<store::MetadataStore>,
    pub ratings: Arc<store::RatingsStore>,
    pub access: Arc<access::AccessFilter>,
    pub notifier: Arc<notifier::ChangeNotifier>,
    pub settings: Arc<settings::SettingsStore>,
    pub config: Config,
}

impl AppState {
    /// Wire up all shared components. The classification oracle is injected
    /// here; `None` disables access filtering entirely (fail open).
    pub async fn build(config: Config, oracle: Option<access::DynOracle>) -> Self {
        store::migrate_legacy_layout(
            &config.catalog.data_directory,
            &config.catalog.source_directory,
        )
        .await;

        let settings =
            Arc::new(settings::SettingsStore::load(&config.catalog.data_directory).await);
        let catalog = Arc::new(catalog::Catalog::new(config.catalog.clone(), settings.clone()));
        let meta_store = Arc::new(store::MetadataStore::new(&config.catalog.data_directory));
        let ratings = Arc::new(store::RatingsStore::new(&config.catalog.data_directory));
        let access = Arc::new(access::AccessFilter::new(oracle, &config.access));
        let notifier = Arc::new(notifier::ChangeNotifier::new(
            config.watcher.poll_interval_secs,
        ));

        Self {
            catalog,
            meta_store,
            ratings,
            access,
            notifier,
            settings,
            config,
        }
    }
}

pub async fn create_app(config: Config) -> Router {
    create_app_with_oracle(config, None).await
}

pub async fn create_app_with_oracle(config: Config, oracle: Option<access::DynOracle>) -> Router {
    let state = AppState::build(config, oracle).await;
    create_router(state)
}

pub fn create_router(state: AppState) -> Router {
    let prefix = format!("/{}", state.config.catalog.path_prefix.trim_matches('/'));

    let routes = Router::new()
        .route("/list", axum::routing::get(catalog::list_handler))
        .route("/image", axum::routing::get(catalog::image_handler))
        .route(
            "/meta",
            axum::routing::get(catalog::get_meta_handler).post(catalog::set_meta_handler),
        )
        .route("/rating", axum::routing::post(catalog::set_rating_handler))
        .route("/ratings", axum::routing::get(catalog::ratings_handler))
        .route(
            "/batch/delete",
            axum::routing::post(catalog::batch_delete_handler),
        )
        .route(
            "/batch/download",
            axum::routing::get(catalog::batch_download_handler),
        )
        .route("/rename", axum::routing::post(catalog::rename_file_handler))
        .route(
            "/rename-folder",
            axum::routing::post(catalog::rename_folder_handler),
        )
        .route("/move-file", axum::routing::post(catalog::move_file_handler))
        .route(
            "/move-folder",
            axum::routing::post(catalog::move_folder_handler),
        )
        .route(
            "/create-folder",
            axum::routing::post(catalog::create_folder_handler),
        )
        .route(
            "/delete-folder",
            axum::routing::post(catalog::delete_folder_handler),
        )
        .route(
            "/delete-file",
            axum::routing::post(catalog::delete_file_handler),
        )
        .route(
            "/settings",
            axum::routing::get(api::get_settings_handler).post(api::update_settings_handler),
        )
        .route("/watch", axum::routing::get(api::watch_status_handler))
        .route("/log", axum::routing::post(api::frontend_log_handler));

    Router::new()
        .nest(&prefix, routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let method = request.method();
                    let uri = request.uri();
                    let headers = request.headers();
                    let user_agent = headers
                        .get("user-agent")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");
                    let referer = headers
                        .get("referer")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");

                    tracing::info!(
                        target: "access_log",
                        method = %method,
                        path = %uri.path(),
                        query = ?uri.query(),
                        user_agent = %user_agent,
                        referer = %referer,
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = response.status();
                        let size = response
                            .headers()
                            .get("content-length")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("-");

                        tracing::info!(
                            target: "access_log",
                            status = %status,
                            size = %size,
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        .with_state(state)
}
