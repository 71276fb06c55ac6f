//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use romhoard::library::scanner::{scan_directory, NoProgress, ScanOptions, ScanResult};
use romhoard::AppState;
use romhoard_common::events::EventBus;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use uuid::Uuid;

/// In-memory database with systems and presets loaded
pub async fn test_pool() -> SqlitePool {
    let pool = romhoard_common::db::init_memory_database()
        .await
        .expect("Failed to create in-memory database");
    romhoard::library::systems::sync_systems(&pool)
        .await
        .expect("Failed to load systems");
    romhoard::library::presets::sync_presets(&pool)
        .await
        .expect("Failed to load presets");
    pool
}

pub fn test_state(pool: SqlitePool, downloads_dir: &Path) -> AppState {
    AppState::new(pool, EventBus::new(100), downloads_dir.to_path_buf())
}

pub fn write_file(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}

pub fn write_zip(root: &Path, rel: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    for (name, data) in files {
        zip.start_file(*name, zip::write::FileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// A real PNG so device image resizing has something to decode
pub fn write_png(root: &Path, rel: &str, width: u32, height: u32) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]))
        .save(&path)
        .unwrap();
    path
}

/// Small library:
/// - gba: Tetris (USA + Europe), Metroid (single-ROM zip), Tetris cover
/// - gb: Zelda
pub fn sample_library(root: &Path) {
    write_file(root, "gba/Tetris (USA).gba", b"tetris-usa-data");
    write_file(root, "gba/Tetris (Europe).gba", b"tetris-europe-data");
    write_zip(root, "gba/Metroid (USA).zip", &[("Metroid (USA).gba", b"metroid-data")]);
    write_file(root, "gb/Zelda (USA).gb", b"zelda-data");
    write_png(root, "gba/covers/Tetris.png", 400, 200);
}

/// Router over a scanned `sample_library`
pub struct TestApp {
    pub library: tempfile::TempDir,
    pub downloads: tempfile::TempDir,
    pub state: AppState,
    pub app: Router,
}

impl TestApp {
    pub async fn empty() -> Self {
        let library = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let state = test_state(test_pool().await, downloads.path());
        let app = romhoard::build_router(state.clone());
        Self {
            library,
            downloads,
            state,
            app,
        }
    }

    pub async fn scanned() -> Self {
        let test_app = Self::empty().await;
        sample_library(test_app.library.path());
        scan(&test_app.state.db, test_app.library.path()).await;
        test_app
    }

    pub fn library_path(&self) -> String {
        self.library.path().to_string_lossy().into_owned()
    }

    pub async fn game_id(&self, system: &str, name: &str) -> i64 {
        game_id(&self.state.db, system, name).await
    }
}

pub async fn scan(pool: &SqlitePool, root: &Path) -> ScanResult {
    scan_directory(pool, root, &ScanOptions::default(), &NoProgress, &CancellationToken::new())
        .await
        .expect("Scan failed")
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn game_id(pool: &SqlitePool, system: &str, name: &str) -> i64 {
    romhoard::db::games::find_game_by_name(pool, system, name)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("Game {} not found in {}", name, system))
        .id
}

pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: header::HeaderName) -> String {
        self.headers
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default()
    }
}

pub async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> RawResponse {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    RawResponse { status, headers, body }
}

/// Send raw bytes as the request body
pub async fn send_bytes(app: &Router, method: &str, uri: &str, body: Vec<u8>) -> RawResponse {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    RawResponse { status, headers, body }
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = request(app, "GET", uri, None).await;
    (response.status, response.json())
}

pub async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = request(app, method, uri, Some(body)).await;
    (response.status, response.json())
}

/// Poll a job endpoint until its status is terminal
pub async fn wait_for_job(app: &Router, uri: &str) -> Value {
    for _ in 0..200 {
        let (status, job) = get_json(app, uri).await;
        assert_eq!(status, StatusCode::OK, "{}", job);
        match job["status"].as_str() {
            Some("completed") | Some("failed") | Some("cancelled") => return job,
            _ => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    }
    panic!("Job at {} did not finish", uri);
}

/// Poll an upload job until it is done or needs systems assigned
pub async fn wait_for_upload(app: &Router, uri: &str) -> Value {
    for _ in 0..200 {
        let (status, job) = get_json(app, uri).await;
        assert_eq!(status, StatusCode::OK, "{}", job);
        match job["status"].as_str() {
            Some("completed") | Some("failed") | Some("awaiting") => return job,
            _ => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    }
    panic!("Upload at {} did not settle", uri);
}

/// Zip archive bytes holding `files`
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        zip.start_file(*name, zip::write::FileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Wait until a completed scan has also finished identification
pub async fn wait_for_scan_idle(state: &AppState, job_id: Uuid) {
    for _ in 0..200 {
        if !state.scan_tokens.read().await.contains_key(&job_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("Scan {} still running", job_id);
}

/// File names inside a zip
pub fn zip_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn zip_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    out
}
