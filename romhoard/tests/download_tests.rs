//! Multi-game download jobs: validation, device layout, expiry

mod common;

use axum::http::{header, StatusCode};
use chrono::{Duration, Utc};
use common::*;
use romhoard::db;
use serde_json::{json, Value};

async fn start(t: &TestApp, body: Value) -> (StatusCode, Value) {
    send_json(&t.app, "POST", "/api/downloads", body).await
}

async fn finished_job(t: &TestApp, body: Value) -> Value {
    let (status, job) = start(t, body).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", job);
    let uri = format!("/api/downloads/{}", job["job_id"].as_str().unwrap());
    wait_for_job(&t.app, &uri).await
}

#[tokio::test]
async fn test_download_request_validation() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;
    let zelda = t.game_id("gb", "Zelda").await;

    let (status, body) = start(&t, json!({"game_ids": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "No games selected");

    let (status, _) = start(&t, json!({"game_ids": [tetris, zelda]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = start(&t, json!({"game_ids": [tetris, 999999]})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = start(&t, json!({"game_ids": [tetris], "device_id": 999999})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(count(&t.state.db, "download_jobs").await, 0);
}

#[tokio::test]
async fn test_bundle_without_device_uses_game_folders() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;
    let metroid = t.game_id("gba", "Metroid").await;

    // Duplicate ids collapse
    let job = finished_job(&t, json!({"game_ids": [tetris, metroid, tetris]})).await;
    assert_eq!(job["status"], "completed", "{}", job);
    assert_eq!(job["games_total"], 2);
    assert_eq!(job["games_included"], 2);
    assert_eq!(job["percent"], 100);
    assert_eq!(job["expired"], false);
    assert!(job["file_name"].as_str().unwrap().starts_with("gba_"));

    let response = request(&t.app, "GET", &format!("/api/downloads/{}/file", job["job_id"].as_str().unwrap()), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.header(header::CONTENT_DISPOSITION).contains(".zip"));
    assert_eq!(
        zip_names(&response.body),
        vec!["Tetris/Tetris (USA).gba", "Metroid/Metroid (USA).gba"]
    );
    assert_eq!(zip_entry(&response.body, "Metroid/Metroid (USA).gba"), b"metroid-data");

    let (_, jobs) = get_json(&t.app, "/api/downloads").await;
    assert_eq!(jobs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bundle_with_device_layout_and_images() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;
    let metroid = t.game_id("gba", "Metroid").await;

    let (status, device) = send_json(
        &t.app,
        "POST",
        "/api/devices",
        json!({
            "name": "Miyoo",
            "include_images": true,
            "image_path_template": "{root_path}/{system}/Imgs/{romname}.png",
            "image_max_width": 100
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let job = finished_job(&t, json!({"game_ids": [tetris, metroid], "device_id": device["id"]})).await;
    assert_eq!(job["status"], "completed", "{}", job);
    assert!(job["file_name"].as_str().unwrap().starts_with("gba_miyoo_"));

    let response = request(&t.app, "GET", &format!("/api/downloads/{}/file", job["job_id"].as_str().unwrap()), None).await;
    assert_eq!(response.status, StatusCode::OK);
    let names = zip_names(&response.body);
    assert_eq!(
        names,
        vec![
            "Roms/GBA/Tetris (USA).gba",
            "Roms/GBA/Imgs/Tetris (USA).png",
            "Roms/GBA/Metroid (USA).gba",
        ]
    );

    // Cover scaled to the device width, aspect kept
    let cover = image::load_from_memory(&zip_entry(&response.body, "Roms/GBA/Imgs/Tetris (USA).png")).unwrap();
    assert_eq!((cover.width(), cover.height()), (100, 50));
}

#[tokio::test]
async fn test_missing_game_listed_in_bundle() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;
    let metroid = t.game_id("gba", "Metroid").await;
    std::fs::remove_file(t.library.path().join("gba/Metroid (USA).zip")).unwrap();

    let job = finished_job(&t, json!({"game_ids": [tetris, metroid]})).await;
    assert_eq!(job["status"], "completed", "{}", job);
    assert_eq!(job["games_included"], 1);
    assert_eq!(job["games_failed"], 1);

    let response = request(&t.app, "GET", &format!("/api/downloads/{}/file", job["job_id"].as_str().unwrap()), None).await;
    let names = zip_names(&response.body);
    assert!(names.contains(&"missing_files.txt".to_string()));
    let listing = String::from_utf8(zip_entry(&response.body, "missing_files.txt")).unwrap();
    assert!(listing.contains("Metroid"));
}

#[tokio::test]
async fn test_game_with_missing_disc_leaves_no_partial_entries() {
    let t = TestApp::empty().await;
    sample_library(t.library.path());
    write_file(t.library.path(), "gba/Golden Sun (USA) (Disc 1).gba", b"golden-sun-1");
    write_file(t.library.path(), "gba/Golden Sun (USA) (Disc 2).gba", b"golden-sun-2");
    scan(&t.state.db, t.library.path()).await;

    let tetris = t.game_id("gba", "Tetris").await;
    let golden_sun = t.game_id("gba", "Golden Sun").await;
    let sets = db::rom_sets::list_rom_sets_for_game(&t.state.db, golden_sun).await.unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(db::roms::list_roms_for_game(&t.state.db, golden_sun).await.unwrap().len(), 2);
    std::fs::remove_file(t.library.path().join("gba/Golden Sun (USA) (Disc 2).gba")).unwrap();

    let job = finished_job(&t, json!({"game_ids": [golden_sun, tetris]})).await;
    assert_eq!(job["status"], "completed", "{}", job);
    assert_eq!(job["games_included"], 1);
    assert_eq!(job["games_failed"], 1);

    let response = request(&t.app, "GET", &format!("/api/downloads/{}/file", job["job_id"].as_str().unwrap()), None).await;
    let names = zip_names(&response.body);
    assert_eq!(names, vec!["Tetris/Tetris (USA).gba", "missing_files.txt"]);
    let listing = String::from_utf8(zip_entry(&response.body, "missing_files.txt")).unwrap();
    assert!(listing.contains("Golden Sun"));
}

#[tokio::test]
async fn test_bundle_file_not_ready_or_expired() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;

    let pending = db::download_jobs::create_download_job(&t.state.db, &[tetris], "gba", None)
        .await
        .unwrap();
    let response = request(&t.app, "GET", &format!("/api/downloads/{}/file", pending.job_id), None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let job = finished_job(&t, json!({"game_ids": [tetris]})).await;
    let job_id = job["job_id"].as_str().unwrap().to_string();
    sqlx::query("UPDATE download_jobs SET expires_at = ? WHERE job_id = ?")
        .bind((Utc::now() - Duration::minutes(5)).to_rfc3339())
        .bind(&job_id)
        .execute(&t.state.db)
        .await
        .unwrap();

    let (_, status) = get_json(&t.app, &format!("/api/downloads/{}", job_id)).await;
    assert_eq!(status["expired"], true);
    let response = request(&t.app, "GET", &format!("/api/downloads/{}/file", job_id), None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&t.app, &format!("/api/downloads/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cleanup_removes_expired_bundles() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;

    let job = finished_job(&t, json!({"game_ids": [tetris]})).await;
    let file_path = job["file_path"].as_str().unwrap().to_string();
    assert!(std::path::Path::new(&file_path).exists());

    sqlx::query("UPDATE download_jobs SET expires_at = ?")
        .bind((Utc::now() - Duration::hours(1)).to_rfc3339())
        .execute(&t.state.db)
        .await
        .unwrap();

    let removed = romhoard::library::download::cleanup_expired_downloads(&t.state.db)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(!std::path::Path::new(&file_path).exists());
    assert_eq!(count(&t.state.db, "download_jobs").await, 0);
}
