//! HTTP API over a scanned library

mod common;

use axum::http::{header, StatusCode};
use common::*;
use romhoard::db;
use romhoard::models::JobStatus;
use serde_json::{json, Value};
use uuid::Uuid;

fn names(games: &Value) -> Vec<String> {
    games
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = TestApp::empty().await;

    let (status, body) = get_json(&t.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "romhoard");
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_systems_with_counts() {
    let t = TestApp::scanned().await;

    let (status, body) = get_json(&t.app, "/api/systems").await;
    assert_eq!(status, StatusCode::OK);
    let systems = body.as_array().unwrap();
    let mut slugs: Vec<&str> = systems.iter().map(|s| s["slug"].as_str().unwrap()).collect();
    slugs.sort_unstable();
    assert_eq!(slugs, vec!["gb", "gba"]);

    let gba = systems.iter().find(|s| s["slug"] == "gba").unwrap();
    assert_eq!(gba["game_count"], 2);
    assert_eq!(gba["rom_count"], 3);

    let (_, filtered) = get_json(&t.app, "/api/systems?q=advance").await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_system_games_sorted_and_page_clamped() {
    let t = TestApp::scanned().await;

    let (status, body) = get_json(&t.app, "/api/systems/gba/games").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["system"]["slug"], "gba");
    assert_eq!(names(&body["games"]), vec!["Metroid", "Tetris"]);

    // Past the end: clamped to the last page
    let (_, body) = get_json(&t.app, "/api/systems/gba/games?page=5&page_size=1").await;
    assert_eq!(body["pagination"]["page"], 2);
    assert_eq!(body["pagination"]["total_pages"], 2);
    assert_eq!(body["pagination"]["total_items"], 2);
    assert_eq!(names(&body["games"]), vec!["Tetris"]);

    let (_, body) = get_json(&t.app, "/api/systems/gba/games?order=desc&page_size=abc").await;
    assert_eq!(names(&body["games"]), vec!["Tetris", "Metroid"]);
    assert_eq!(body["pagination"]["page_size"], 50);

    let (status, body) = get_json(&t.app, "/api/systems/nope/games").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_search_across_systems() {
    let t = TestApp::scanned().await;

    let (status, body) = get_json(&t.app, "/api/search?q=tetris").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body["games"]), vec!["Tetris"]);
    assert_eq!(body["pagination"]["total_items"], 1);

    let (_, body) = get_json(&t.app, "/api/search?system=gb").await;
    assert_eq!(names(&body["games"]), vec!["Zelda"]);
    assert!(body["systems"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_game_detail_rename_and_favorite() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;

    let (status, detail) = get_json(&t.app, &format!("/api/games/{}", tetris)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["name"], "Tetris");
    assert_eq!(detail["system"]["slug"], "gba");
    let sets = detail["rom_sets"].as_array().unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0]["is_default"], true);
    assert_eq!(sets[0]["region"], "USA");
    assert_eq!(detail["images"].as_array().unwrap().len(), 1);
    assert_eq!(detail["is_favorite"], false);

    let (status, _) = send_json(&t.app, "PATCH", &format!("/api/games/{}", tetris), json!({"name": "Metroid"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send_json(&t.app, "PATCH", &format!("/api/games/{}", tetris), json!({"rating": 101})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, renamed) = send_json(
        &t.app,
        "PATCH",
        &format!("/api/games/{}", tetris),
        json!({"name": "Tetris DX", "developer": "Nintendo", "genres": ["Puzzle"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["name"], "Tetris DX");
    assert_eq!(renamed["name_source"], "manual");
    assert_eq!(renamed["developer"], "Nintendo");
    assert_eq!(renamed["genres"].as_array().unwrap().len(), 1);

    let (_, fav) = send_json(&t.app, "POST", &format!("/api/games/{}/favorite", tetris), json!({})).await;
    assert_eq!(fav["is_favorite"], true);
    let (_, detail) = get_json(&t.app, &format!("/api/games/{}", tetris)).await;
    assert_eq!(detail["is_favorite"], true);
    assert_eq!(detail["collections"][0]["slug"], "favorites");
    let (_, fav) = send_json(&t.app, "POST", &format!("/api/games/{}/favorite", tetris), json!({})).await;
    assert_eq!(fav["is_favorite"], false);

    let (status, _) = get_json(&t.app, "/api/games/999999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_set_default_romset_and_delete_game() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;
    let metroid = t.game_id("gba", "Metroid").await;
    let sets = db::rom_sets::list_rom_sets_for_game(&t.state.db, tetris).await.unwrap();
    let europe = sets.iter().find(|s| s.region == "Europe").unwrap();
    let metroid_set = db::rom_sets::list_rom_sets_for_game(&t.state.db, metroid).await.unwrap()[0].id;

    let uri = format!("/api/games/{}/default-romset", tetris);
    let (status, _) = send_json(&t.app, "PUT", &uri, json!({"rom_set_id": metroid_set})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, detail) = send_json(&t.app, "PUT", &uri, json!({"rom_set_id": europe.id})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["default_rom_set_id"], europe.id);

    let response = request(&t.app, "DELETE", &format!("/api/games/{}", metroid), None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    let response = request(&t.app, "DELETE", &format!("/api/games/{}", metroid), None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rom_downloads() {
    let t = TestApp::scanned().await;
    let pool = &t.state.db;

    let tetris = t.game_id("gba", "Tetris").await;
    let tetris_roms = db::roms::list_roms_for_game(pool, tetris).await.unwrap();
    let usa = tetris_roms.iter().find(|r| r.file_name == "Tetris (USA).gba").unwrap();

    let response = request(&t.app, "GET", &format!("/api/roms/{}/download", usa.id), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        "attachment; filename=\"Tetris (USA).gba\""
    );
    assert_eq!(response.header(header::CONTENT_LENGTH), "15");
    assert_eq!(&response.body[..], b"tetris-usa-data");

    // Archived ROM: extracted by default, whole archive when stored
    let metroid = t.game_id("gba", "Metroid").await;
    let metroid_rom = &db::roms::list_roms_for_game(pool, metroid).await.unwrap()[0];

    let extracted = request(&t.app, "GET", &format!("/api/roms/{}/download", metroid_rom.id), None).await;
    assert_eq!(extracted.status, StatusCode::OK);
    assert_eq!(&extracted.body[..], b"metroid-data");
    assert!(extracted.header(header::CONTENT_DISPOSITION).contains("Metroid (USA).gba"));

    let stored = request(
        &t.app,
        "GET",
        &format!("/api/roms/{}/download?mode=stored", metroid_rom.id),
        None,
    )
    .await;
    assert_eq!(stored.status, StatusCode::OK);
    assert_eq!(stored.header(header::CONTENT_TYPE), "application/zip");
    assert_eq!(zip_names(&stored.body), vec!["Metroid (USA).gba"]);

    let bogus = request(&t.app, "GET", &format!("/api/roms/{}/download?mode=bogus", usa.id), None).await;
    assert_eq!(bogus.status, StatusCode::BAD_REQUEST);

    // File gone from disk
    std::fs::remove_file(&usa.file_path).unwrap();
    let missing = request(&t.app, "GET", &format!("/api/roms/{}/download", usa.id), None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_romset_and_game_downloads() {
    let t = TestApp::scanned().await;
    let pool = &t.state.db;
    let metroid = t.game_id("gba", "Metroid").await;
    let set_id = db::rom_sets::list_rom_sets_for_game(pool, metroid).await.unwrap()[0].id;

    let response = request(&t.app, "GET", &format!("/api/romsets/{}/download", set_id), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        "attachment; filename=\"Metroid.zip\""
    );
    assert_eq!(zip_names(&response.body), vec!["Metroid (USA).gba"]);
    assert_eq!(zip_entry(&response.body, "Metroid (USA).gba"), b"metroid-data");

    // Best set of the game
    let tetris = t.game_id("gba", "Tetris").await;
    let response = request(&t.app, "GET", &format!("/api/games/{}/download", tetris), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(zip_names(&response.body), vec!["Tetris (USA).gba"]);

    let response = request(&t.app, "GET", "/api/romsets/999999/download", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_serve_image() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;
    let image = &db::images::list_images_for_game(&t.state.db, tetris).await.unwrap()[0];
    assert_eq!(image.image_type, "cover");

    let response = request(&t.app, "GET", &format!("/api/images/{}", image.id), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "image/png");
    assert!(response.headers.get(header::CONTENT_DISPOSITION).is_none());
    assert_eq!(&response.body[1..4], b"PNG");
}

#[tokio::test]
async fn test_settings_and_region_recalculation() {
    let t = TestApp::scanned().await;

    let (status, all) = get_json(&t.app, "/api/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["region_priorities"], json!(["USA", "Europe", "Japan", "World"]));
    assert_eq!(all["download_expiry_hours"], 1);

    let (status, _) = get_json(&t.app, "/api/settings/not_a_setting").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(&t.app, "PUT", "/api/settings/download_expiry_hours", json!({"value": 0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send_json(&t.app, "PUT", "/api/settings/not_a_setting", json!({"value": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send_json(&t.app, "PUT", "/api/settings/region_priorities", json!({"value": [1, 2]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_json(
        &t.app,
        "PUT",
        "/api/settings/region_priorities",
        json!({"value": ["Europe", "USA"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], json!(["Europe", "USA"]));

    let (status, body) = send_json(&t.app, "POST", "/api/romsets/recalculate", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], 1);

    let tetris = t.game_id("gba", "Tetris").await;
    let (_, detail) = get_json(&t.app, &format!("/api/games/{}", tetris)).await;
    assert_eq!(detail["rom_sets"][0]["region"], "Europe");
    assert_eq!(detail["rom_sets"][0]["is_default"], true);
}

#[tokio::test]
async fn test_scan_job_lifecycle() {
    let t = TestApp::empty().await;
    sample_library(t.library.path());
    let path = t.library_path();

    let (status, _) = send_json(&t.app, "POST", "/api/scan/start", json!({"path": "/definitely/not/here"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A pending job for the same path blocks a second start
    let pending = db::scan_jobs::create_scan_job(&t.state.db, &path, false).await.unwrap();
    let (status, body) = send_json(&t.app, "POST", "/api/scan/start", json!({"path": path})).await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let (status, cancelled) = send_json(&t.app, "POST", &format!("/api/scan/cancel/{}", pending.job_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, job) = send_json(&t.app, "POST", "/api/scan/start", json!({"path": path, "use_hasheous": false})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id: Uuid = job["job_id"].as_str().unwrap().parse().unwrap();

    let finished = wait_for_job(&t.app, &format!("/api/scan/status/{}", job_id)).await;
    assert_eq!(finished["status"], "completed", "{}", finished);
    assert_eq!(finished["added"], 4);
    assert_eq!(finished["images_added"], 1);
    wait_for_scan_idle(&t.state, job_id).await;

    let stored = db::scan_jobs::get_scan_job(&t.state.db, job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.completed_at.is_some());

    // Terminal jobs cannot be cancelled
    let (status, _) = send_json(&t.app, "POST", &format!("/api/scan/cancel/{}", job_id), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send_json(&t.app, "POST", &format!("/api/scan/cancel/{}", Uuid::new_v4()), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, jobs) = get_json(&t.app, "/api/scan/jobs?limit=1").await;
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    let (_, jobs) = get_json(&t.app, "/api/scan/jobs").await;
    assert_eq!(jobs.as_array().unwrap().len(), 2);

    let (_, systems) = get_json(&t.app, "/api/systems").await;
    assert_eq!(systems.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_scan_paths_crud_and_delete() {
    let t = TestApp::scanned().await;
    let path = t.library_path();

    let (status, created) = send_json(&t.app, "POST", "/api/scan-paths", json!({"path": path})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["use_hasheous"], true);
    assert_eq!(created["schedule_enabled"], false);
    assert_eq!(created["schedule_interval"], "daily");
    let id = created["id"].as_i64().unwrap();

    let (status, _) = send_json(&t.app, "POST", "/api/scan-paths", json!({"path": path})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send_json(&t.app, "POST", "/api/scan-paths", json!({"path": "/definitely/not/here"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = send_json(
        &t.app,
        "PATCH",
        &format!("/api/scan-paths/{}", id),
        json!({"schedule_enabled": true, "schedule_interval": "weekly"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["schedule_enabled"], true);
    assert_eq!(updated["schedule_interval"], "weekly");

    let (_, listed) = get_json(&t.app, "/api/scan-paths").await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, preview) = get_json(&t.app, &format!("/api/scan-paths/{}/delete-preview", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["rom_count"], 4);
    assert_eq!(preview["game_count"], 3);
    assert_eq!(preview["image_count"], 1);

    let (status, deleted) = send_json(&t.app, "DELETE", &format!("/api/scan-paths/{}", id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted_roms"], 4);
    assert_eq!(deleted["deleted_games"], 3);

    let (_, systems) = get_json(&t.app, "/api/systems").await;
    assert!(systems.as_array().unwrap().is_empty());
    let (status, _) = get_json(&t.app, &format!("/api/scan-paths/{}/delete-preview", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scan_path_delete_refused_while_scanning() {
    let t = TestApp::scanned().await;
    let path = t.library_path();
    let (_, created) = send_json(&t.app, "POST", "/api/scan-paths", json!({"path": path})).await;
    db::scan_jobs::create_scan_job(&t.state.db, &path, true).await.unwrap();

    let (status, _) = send_json(
        &t.app,
        "DELETE",
        &format!("/api/scan-paths/{}", created["id"]),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(count(&t.state.db, "roms").await, 4);
}

#[tokio::test]
async fn test_devices_and_presets() {
    let t = TestApp::empty().await;

    let (status, presets) = get_json(&t.app, "/api/device-presets").await;
    assert_eq!(status, StatusCode::OK);
    let minui = presets
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["slug"] == "minui")
        .unwrap()
        .clone();
    assert_eq!(minui["is_builtin"], true);

    let (status, device) = send_json(&t.app, "POST", "/api/devices", json!({"name": "Miyoo Mini"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(device["slug"], "miyoo-mini");
    assert_eq!(device["root_path"], "Roms/");
    assert_eq!(device["include_images"], false);
    let id = device["id"].as_i64().unwrap();

    let (status, _) = send_json(&t.app, "POST", "/api/devices", json!({"name": "Bad", "image_type": "poster"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, applied) = send_json(
        &t.app,
        "POST",
        &format!("/api/devices/{}/apply-preset", id),
        json!({"preset": "minui"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(applied["applied_preset"], "minui");
    assert_eq!(applied["include_images"], true);
    assert_eq!(applied["image_max_width"], minui["images"]["max_width"]);
    assert_eq!(applied["system_paths"]["gba"]["folder"], "Game Boy Advance (GBA)");

    let (status, _) = send_json(
        &t.app,
        "POST",
        &format!("/api/devices/{}/apply-preset", id),
        json!({"preset": "nope"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, preset) = send_json(
        &t.app,
        "POST",
        "/api/device-presets",
        json!({"name": "My Miyoo", "device_id": id}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(preset["slug"], "my-miyoo");
    assert_eq!(preset["is_builtin"], false);
    assert_eq!(preset["folders"]["root_path"], "Roms/");

    let response = request(&t.app, "DELETE", "/api/device-presets/minui", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let response = request(&t.app, "DELETE", "/api/device-presets/my-miyoo", None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = request(&t.app, "DELETE", &format!("/api/devices/{}", id), None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    let (status, _) = get_json(&t.app, &format!("/api/devices/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_collections_export_and_import() {
    let t = TestApp::scanned().await;

    let (status, created) = send_json(&t.app, "POST", "/api/collections", json!({"name": "Handheld Hits"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["slug"], "handheld-hits");
    let id = created["id"].as_i64().unwrap();

    let (status, _) = send_json(&t.app, "POST", "/api/collections", json!({"name": "Handheld Hits"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let entries_uri = format!("/api/collections/{}/entries", id);
    let (status, tetris) = send_json(&t.app, "POST", &entries_uri, json!({"game_name": "Tetris", "system_slug": "gba"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tetris["in_library"], true);
    let (_, wanted) = send_json(
        &t.app,
        "POST",
        &entries_uri,
        json!({"game_name": "Golden Sun", "system_slug": "gba", "notes": "someday"}),
    )
    .await;
    assert_eq!(wanted["in_library"], false);
    let (status, _) = send_json(&t.app, "POST", &entries_uri, json!({"game_name": "Tetris", "system_slug": "gba"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, reordered) = send_json(
        &t.app,
        "PUT",
        &format!("/api/collections/{}/order", id),
        json!({"entry_ids": [wanted["id"], tetris["id"]]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reordered[0]["game_name"], "Golden Sun");

    let exported = request(&t.app, "GET", &format!("/api/collections/{}/export", id), None).await;
    assert_eq!(exported.status, StatusCode::OK);
    assert!(exported.header(header::CONTENT_DISPOSITION).contains("handheld-hits.json"));
    let document = exported.json();
    assert_eq!(document["romhoard_collection"]["version"], "1.0");
    assert_eq!(document["entries"].as_array().unwrap().len(), 2);

    let (status, _) = send_json(&t.app, "POST", "/api/collections/import", json!({"data": document})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, summary) = send_json(
        &t.app,
        "POST",
        "/api/collections/import",
        json!({"data": document, "overwrite": true}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(summary["collection_id"], id);
    assert_eq!(summary["entries_imported"], 2);
    // Placeholder game for the entry the library lacked
    assert_eq!(summary["games_created"], 1);
    t.game_id("gba", "Golden Sun").await;

    let (status, _) = send_json(&t.app, "POST", "/api/collections/import", json!({"data": {"entries": []}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Overwrite replaced the entries, order kept
    let (_, detail) = get_json(&t.app, &format!("/api/collections/{}", id)).await;
    let entries = detail["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["in_library"] == true));
    assert_eq!(entries[1]["game_name"], "Tetris");

    let response = request(
        &t.app,
        "DELETE",
        &format!("/api/collections/{}/entries/{}", id, entries[1]["id"]),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    let response = request(&t.app, "DELETE", &format!("/api/collections/{}", id), None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    let (status, _) = get_json(&t.app, &format!("/api/collections/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_collection_archive_round_trip() {
    let t = TestApp::scanned().await;
    let tetris = t.game_id("gba", "Tetris").await;
    let mut game = db::games::get_game(&t.state.db, tetris).await.unwrap().unwrap();
    game.developer = "Alexey Pajitnov".into();
    db::games::save_game(&t.state.db, &game).await.unwrap();

    let (_, created) = send_json(&t.app, "POST", "/api/collections", json!({"name": "Puzzlers"})).await;
    let id = created["id"].as_i64().unwrap();
    send_json(
        &t.app,
        "POST",
        &format!("/api/collections/{}/entries", id),
        json!({"game_name": "Tetris", "system_slug": "gba"}),
    )
    .await;

    let exported = request(&t.app, "GET", &format!("/api/collections/{}/export/archive", id), None).await;
    assert_eq!(exported.status, StatusCode::OK);
    assert!(exported.header(header::CONTENT_DISPOSITION).contains("puzzlers.zip"));
    let names = zip_names(&exported.body);
    assert!(names.contains(&"collection.json".to_string()), "{:?}", names);
    assert!(names.contains(&"games/Tetris_gba.json".to_string()));
    assert!(names.contains(&"images/Tetris_gba/cover.png".to_string()));
    let metadata: Value = serde_json::from_slice(&zip_entry(&exported.body, "games/Tetris_gba.json")).unwrap();
    assert_eq!(metadata["developer"], "Alexey Pajitnov");

    let response = send_bytes(&t.app, "POST", "/api/collections/validate/archive", exported.body.to_vec()).await;
    assert_eq!(response.status, StatusCode::OK);
    let report = response.json();
    assert_eq!(report["is_valid"], true, "{}", report);
    assert_eq!(report["game_count"], 1);
    assert_eq!(report["image_count"], 1);

    let response = send_bytes(&t.app, "POST", "/api/collections/validate/archive", b"not a zip".to_vec()).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["is_valid"], false);

    // A second library learns the metadata and artwork
    let other = TestApp::scanned().await;
    let response = send_bytes(&other.app, "POST", "/api/collections/import/archive", exported.body.to_vec()).await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.json());
    let summary = response.json();
    assert_eq!(summary["entries_imported"], 1);
    assert_eq!(summary["metadata_applied"], 1);
    // Tetris already has a scanned cover
    assert_eq!(summary["images_imported"], 0);
    let other_tetris = other.game_id("gba", "Tetris").await;
    let imported = db::games::get_game(&other.state.db, other_tetris).await.unwrap().unwrap();
    assert_eq!(imported.developer, "Alexey Pajitnov");

    let response = send_bytes(&other.app, "POST", "/api/collections/import/archive", exported.body.to_vec()).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    let response = send_bytes(
        &other.app,
        "POST",
        "/api/collections/import/archive?overwrite=true&creator=friend",
        exported.body.to_vec(),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let missing = zip_bytes(&[("games/Tetris_gba.json", b"{}")]);
    let response = send_bytes(&other.app, "POST", "/api/collections/import/archive", missing).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = request(&t.app, "GET", "/api/collections/9999/export/archive", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
