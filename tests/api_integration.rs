use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use gashu::access::{Classification, ClassificationOracle, OracleError, Viewer, viewer_cookie_header};
use gashu::{Config, create_app, create_app_with_oracle};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.catalog.source_directory = temp.path().join("output");
    config.catalog.data_directory = temp.path().join("data");
    config.catalog.thumbnail_max_edge = 64;
    std::fs::create_dir_all(&config.catalog.source_directory).unwrap();
    std::fs::create_dir_all(&config.catalog.data_directory).unwrap();
    config
}

fn write_test_image(path: &Path, width: u32, height: u32) {
    use image::{ImageBuffer, Rgb};
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 2) as u8, (y * 2) as u8, 64u8])
    });
    img.save(path).unwrap();
}

fn set_mtime(path: &Path, modified: SystemTime) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(modified).unwrap();
}

async fn server(config: Config) -> TestServer {
    TestServer::new(create_app(config).await).unwrap()
}

fn image_names(body: &Value) -> Vec<String> {
    body["images"]
        .as_array()
        .unwrap()
        .iter()
        .map(|img| img["relpath"].as_str().unwrap().to_string())
        .collect()
}

/// Oracle used to exercise access filtering end to end.
struct TestOracle {
    blocked: HashSet<String>,
    enforce_named: bool,
}

impl TestOracle {
    fn blocking(names: &[&str], enforce_named: bool) -> Arc<Self> {
        Arc::new(Self {
            blocked: names.iter().map(|n| n.to_string()).collect(),
            enforce_named,
        })
    }
}

#[async_trait]
impl ClassificationOracle for TestOracle {
    async fn restriction_enforced(&self, _viewer: &Viewer) -> Result<bool, OracleError> {
        Ok(self.enforce_named)
    }

    async fn classify(&self, path: &Path) -> Result<Classification, OracleError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if self.blocked.contains(name) {
            Ok(Classification::Blocked)
        } else {
            Ok(Classification::Allowed)
        }
    }

    fn name(&self) -> &str {
        "test oracle"
    }
}

#[tokio::test]
async fn list_orders_newest_first_and_excludes_thumbs() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();

    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_704_067_200); // 2024-01-01
    write_test_image(&root.join("a.png"), 10, 10);
    set_mtime(&root.join("a.png"), base);
    write_test_image(&root.join("b.jpg"), 10, 10);
    set_mtime(&root.join("b.jpg"), base + Duration::from_secs(31 * 86400));
    // Decoy inside the reserved thumbnail directory must never be listed.
    write_test_image(&root.join("_thumbs/b.jpg"), 10, 10);

    let server = server(config).await;
    let response = server.get("/gallery/list").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["ok"], json!(true));
    assert_eq!(image_names(&body), vec!["b.jpg", "a.png"]);

    let folders = body["folders"].as_array().unwrap();
    assert_eq!(folders[0]["path"], json!(""));
    assert_eq!(folders[0]["count"], json!(2));
}

#[tokio::test]
async fn rating_round_trip_with_clamping() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    write_test_image(&config.catalog.source_directory.join("a.png"), 8, 8);

    let server = server(config).await;

    let response = server
        .post("/gallery/rating")
        .json(&json!({"filename": "a.png", "rating": 4}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["ok"], json!(true));

    let response = server
        .post("/gallery/rating")
        .json(&json!({"filename": "b.png", "rating": 9}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let ratings: Value = server.get("/gallery/ratings").await.json();
    assert_eq!(ratings["a.png"], json!(4));
    assert_eq!(ratings["b.png"], json!(5));
}

#[tokio::test]
async fn meta_round_trip_merges_rather_than_replaces() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    write_test_image(&config.catalog.source_directory.join("pic.png"), 8, 8);

    let server = server(config).await;

    let response = server
        .post("/gallery/meta")
        .json(&json!({"filename": "pic.png", "meta": {"rating": 4, "tags": ["a", "b"]}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Second write touches only the title; rating and tags must survive.
    server
        .post("/gallery/meta")
        .json(&json!({"filename": "pic.png", "meta": {"title": "Morning"}}))
        .await;

    let body: Value = server
        .get("/gallery/meta?filename=pic.png")
        .await
        .json();
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["meta"]["rating"], json!(4));
    assert_eq!(body["meta"]["tags"], json!(["a", "b"]));
    assert_eq!(body["meta"]["title"], json!("Morning"));
    // Extraction-derived file info rides along.
    assert_eq!(body["meta"]["fileinfo"]["width"], json!(8));
}

#[tokio::test]
async fn list_merges_user_edited_fields() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    write_test_image(&config.catalog.source_directory.join("pic.png"), 8, 8);

    let server = server(config).await;
    server
        .post("/gallery/rating")
        .json(&json!({"filename": "pic.png", "rating": 3}))
        .await;
    server
        .post("/gallery/meta")
        .json(&json!({"filename": "pic.png", "meta": {"title": "Dunes", "tags": ["x"]}}))
        .await;

    let body: Value = server.get("/gallery/list").await.json();
    let image = &body["images"][0];
    assert_eq!(image["rating"], json!(3));
    assert_eq!(image["title"], json!("Dunes"));
    assert_eq!(image["tags"], json!(["x"]));
}

#[tokio::test]
async fn rename_moves_metadata_and_rating_keys() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();
    write_test_image(&root.join("old/x.png"), 8, 8);
    write_test_image(&root.join("other.png"), 8, 8);

    let server = server(config).await;
    server
        .post("/gallery/rating")
        .json(&json!({"filename": "old/x.png", "rating": 4}))
        .await;
    server
        .post("/gallery/rating")
        .json(&json!({"filename": "other.png", "rating": 2}))
        .await;
    server
        .post("/gallery/meta")
        .json(&json!({"filename": "old/x.png", "meta": {"title": "Keep me"}}))
        .await;

    let response = server
        .post("/gallery/rename")
        .json(&json!({"filename": "old/x.png", "new_name": "y.png"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["filename"], json!("old/y.png"));

    assert!(!root.join("old/x.png").exists());
    assert!(root.join("old/y.png").exists());

    let ratings: Value = server.get("/gallery/ratings").await.json();
    assert!(ratings.get("old/x.png").is_none());
    assert_eq!(ratings["old/y.png"], json!(4));
    assert_eq!(ratings["other.png"], json!(2));

    let meta: Value = server
        .get("/gallery/meta?filename=old%2Fy.png")
        .await
        .json();
    assert_eq!(meta["meta"]["title"], json!("Keep me"));
}

#[tokio::test]
async fn move_folder_rekeys_entries() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();
    write_test_image(&root.join("trips/a.png"), 8, 8);

    let server = server(config).await;
    server
        .post("/gallery/rating")
        .json(&json!({"filename": "trips/a.png", "rating": 5}))
        .await;
    server
        .post("/gallery/create-folder")
        .json(&json!({"folder": "archive"}))
        .await;

    let response = server
        .post("/gallery/move-folder")
        .json(&json!({"folder": "trips", "target_folder": "archive"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert!(root.join("archive/trips/a.png").exists());
    let ratings: Value = server.get("/gallery/ratings").await.json();
    assert_eq!(ratings["archive/trips/a.png"], json!(5));
}

#[tokio::test]
async fn batch_delete_reports_successes_and_errors() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();
    write_test_image(&root.join("one.png"), 8, 8);
    write_test_image(&root.join("two.png"), 8, 8);

    let server = server(config).await;
    let response = server
        .post("/gallery/batch/delete")
        .json(&json!({"filenames": ["one.png", "two.png", "missing.png"]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["count"], json!(2));
    assert_eq!(body["deleted"].as_array().unwrap().len(), 2);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert!(!root.join("one.png").exists());
    assert!(!root.join("two.png").exists());
}

#[tokio::test]
async fn batch_download_streams_a_zip() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();
    write_test_image(&root.join("a.png"), 8, 8);
    write_test_image(&root.join("sub/b.png"), 8, 8);

    let server = server(config).await;
    let response = server
        .get("/gallery/batch/download?filenames=a.png,sub%2Fb.png")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE),
        Some(&HeaderValue::from_static("application/zip"))
    );
    // ZIP local file header magic.
    assert_eq!(&response.as_bytes()[0..2], b"PK");
}

#[tokio::test]
async fn thumbnail_is_generated_cached_and_served() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();
    write_test_image(&root.join("pic.png"), 200, 100);

    let server = server(config).await;
    let response = server.get("/gallery/image?filename=pic.png&size=thumb").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE),
        Some(&HeaderValue::from_static("image/png"))
    );

    // Cached under the reserved directory, and still absent from listings.
    assert!(root.join("_thumbs/pic.png").exists());
    let body: Value = server.get("/gallery/list").await.json();
    assert_eq!(image_names(&body), vec!["pic.png"]);

    // Second request serves the cached artifact.
    let again = server.get("/gallery/image?filename=pic.png&size=thumb").await;
    assert_eq!(again.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn corrupt_image_thumbnail_falls_back_to_original() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();
    std::fs::write(root.join("broken.png"), b"not really a png").unwrap();

    let server = server(config).await;
    let response = server
        .get("/gallery/image?filename=broken.png&size=thumb")
        .await;
    // Generation fails, the original bytes are served instead.
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.as_bytes().as_ref(), b"not really a png");
}

#[tokio::test]
async fn traversal_attempts_are_rejected() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    std::fs::write(temp.path().join("secret.txt"), b"top secret").unwrap();

    let server = server(config).await;

    let response = server
        .get("/gallery/image?filename=..%2Fsecret.txt")
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = server
        .post("/gallery/delete-file")
        .json(&json!({"filename": "../secret.txt"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert!(temp.path().join("secret.txt").exists());

    let response = server
        .post("/gallery/rating")
        .json(&json!({"filename": "/etc/passwd", "rating": 1}))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn settings_round_trip_and_watch_status() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);

    let server = server(config).await;

    let body: Value = server.get("/gallery/settings").await.json();
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["settings"]["use_polling"], json!(false));

    let response = server
        .post("/gallery/settings")
        .json(&json!({"tracked_extensions": ["png", ".JPG"], "use_polling": true}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["settings"]["tracked_extensions"], json!(["png", "jpg"]));
    assert_eq!(body["settings"]["use_polling"], json!(true));

    // Monitoring is not started by the router; status is reported, not pushed.
    let body: Value = server.get("/gallery/watch").await.json();
    assert_eq!(body["monitoring"], json!(false));
}

#[tokio::test]
async fn settings_filter_subsequent_scans() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();
    write_test_image(&root.join("keep.png"), 8, 8);
    write_test_image(&root.join("drop.jpg"), 8, 8);

    let server = server(config).await;
    server
        .post("/gallery/settings")
        .json(&json!({"tracked_extensions": ["png"]}))
        .await;

    let body: Value = server.get("/gallery/list").await.json();
    assert_eq!(image_names(&body), vec!["keep.png"]);
}

#[tokio::test]
async fn anonymous_viewer_never_sees_blocked_images() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let root = config.catalog.source_directory.clone();
    write_test_image(&root.join("safe.png"), 8, 8);
    write_test_image(&root.join("nsfw.png"), 8, 8);

    let oracle = TestOracle::blocking(&["nsfw.png"], true);
    let server = TestServer::new(create_app_with_oracle(config, Some(oracle)).await).unwrap();

    let body: Value = server.get("/gallery/list").await.json();
    assert_eq!(image_names(&body), vec!["safe.png"]);

    let response = server.get("/gallery/image?filename=nsfw.png").await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let response = server.get("/gallery/image?filename=safe.png").await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn named_viewer_with_enforcement_disabled_sees_everything() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let secret = config.app.auth_secret.clone();
    let root = config.catalog.source_directory.clone();
    write_test_image(&root.join("safe.png"), 8, 8);
    write_test_image(&root.join("nsfw.png"), 8, 8);

    let oracle = TestOracle::blocking(&["nsfw.png"], false);
    let server = TestServer::new(create_app_with_oracle(config, Some(oracle)).await).unwrap();

    let cookie = viewer_cookie_header(&secret, "alice").unwrap();
    let body: Value = server
        .get("/gallery/list")
        .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
        .await
        .json();
    let mut names = image_names(&body);
    names.sort();
    assert_eq!(names, vec!["nsfw.png", "safe.png"]);

    let response = server
        .get("/gallery/image?filename=nsfw.png")
        .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn frontend_log_endpoint_accepts_entries() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let data_dir = config.catalog.data_directory.clone();

    let server = server(config).await;
    let response = server
        .post("/gallery/log")
        .json(&json!({"level": "WARN", "source": "ui", "message": "thumbnail slow"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let log = std::fs::read_to_string(data_dir.join("gallery.log")).unwrap();
    assert!(log.contains("thumbnail slow"));
}
