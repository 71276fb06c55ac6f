//! ROM file persistence

use chrono::Utc;
use romhoard_common::Result;
use sqlx::SqlitePool;

use crate::models::{NewRom, Rom};

const ROM_COLUMNS: &str = "id, rom_set_id, file_path, file_name, file_size, archive_path, \
    path_in_archive, crc32, sha1, tags, rom_number, disc, content_type, switch_title_id, created_at";

pub async fn insert_rom(pool: &SqlitePool, rom: &NewRom) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO roms (rom_set_id, file_path, file_name, file_size, archive_path,
                          path_in_archive, crc32, sha1, tags, rom_number, disc,
                          content_type, switch_title_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(rom.rom_set_id)
    .bind(&rom.file_path)
    .bind(&rom.file_name)
    .bind(rom.file_size)
    .bind(&rom.archive_path)
    .bind(&rom.path_in_archive)
    .bind(rom.crc32.to_lowercase())
    .bind(rom.sha1.to_lowercase())
    .bind(serde_json::to_string(&rom.tags)?)
    .bind(&rom.rom_number)
    .bind(rom.disc)
    .bind(&rom.content_type)
    .bind(&rom.switch_title_id)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_rom(pool: &SqlitePool, id: i64) -> Result<Option<Rom>> {
    let sql = format!("SELECT {} FROM roms WHERE id = ?", ROM_COLUMNS);
    Ok(sqlx::query_as::<_, Rom>(&sql).bind(id).fetch_optional(pool).await?)
}

/// ROMs of a set, ordered by disc then file name
pub async fn list_roms_for_rom_set(pool: &SqlitePool, rom_set_id: i64) -> Result<Vec<Rom>> {
    let sql = format!(
        "SELECT {} FROM roms WHERE rom_set_id = ? ORDER BY disc IS NULL, disc, file_name, id",
        ROM_COLUMNS
    );
    Ok(sqlx::query_as::<_, Rom>(&sql).bind(rom_set_id).fetch_all(pool).await?)
}

pub async fn rom_exists_by_path(pool: &SqlitePool, file_path: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM roms WHERE file_path = ? LIMIT 1")
        .bind(file_path)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn archived_entry_exists(pool: &SqlitePool, archive_path: &str, path_in_archive: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM roms WHERE archive_path = ? AND path_in_archive = ? LIMIT 1",
    )
    .bind(archive_path)
    .bind(path_in_archive)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// Number of ROMs stored from one archive
pub async fn count_roms_in_archive(pool: &SqlitePool, archive_path: &str) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM roms WHERE archive_path = ?")
        .bind(archive_path)
        .fetch_one(pool)
        .await?)
}

/// ROMs whose `file_path` starts with `prefix`
pub async fn list_roms_with_path_prefix(pool: &SqlitePool, prefix: &str) -> Result<Vec<Rom>> {
    let sql = format!(
        "SELECT {} FROM roms WHERE substr(file_path, 1, length(?)) = ? ORDER BY id",
        ROM_COLUMNS
    );
    Ok(sqlx::query_as::<_, Rom>(&sql)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(pool)
        .await?)
}

/// ROMs whose `file_path` or `archive_path` lies under a directory
pub async fn list_roms_under_directory(pool: &SqlitePool, directory: &str) -> Result<Vec<Rom>> {
    let prefix = format!("{}/", directory.trim_end_matches('/'));
    let sql = format!(
        r#"
        SELECT {} FROM roms
        WHERE substr(file_path, 1, length(?)) = ?
           OR (archive_path != '' AND substr(archive_path, 1, length(?)) = ?)
        ORDER BY id
        "#,
        ROM_COLUMNS
    );
    Ok(sqlx::query_as::<_, Rom>(&sql)
        .bind(&prefix)
        .bind(&prefix)
        .bind(&prefix)
        .bind(&prefix)
        .fetch_all(pool)
        .await?)
}

pub async fn delete_rom(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM roms WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// All ROMs of a game across its sets
pub async fn list_roms_for_game(pool: &SqlitePool, game_id: i64) -> Result<Vec<Rom>> {
    let columns: Vec<String> = ROM_COLUMNS.split(", ").map(|c| format!("r.{}", c.trim())).collect();
    let sql = format!(
        "SELECT {} FROM roms r JOIN rom_sets rs ON rs.id = r.rom_set_id WHERE rs.game_id = ? ORDER BY r.id",
        columns.join(", ")
    );
    Ok(sqlx::query_as::<_, Rom>(&sql).bind(game_id).fetch_all(pool).await?)
}
