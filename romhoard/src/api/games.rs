//! Game detail, edits, merges, favorites and duplicate review

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use romhoard_common::events::RomhoardEvent;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::library::collections;
use crate::library::merge::{find_duplicate_groups, merge_games, DuplicateGroup, MergeSummary};
use crate::library::romset_scoring::recalculate_all_default_romsets;
use crate::models::{name_source, Collection, Game, GameImage, Genre, Rom, RomSet, System};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RomSetDetail {
    #[serde(flatten)]
    pub rom_set: RomSet,
    pub is_default: bool,
    pub roms: Vec<Rom>,
}

#[derive(Debug, Serialize)]
pub struct GameDetail {
    #[serde(flatten)]
    pub game: Game,
    pub system: Option<System>,
    pub rom_sets: Vec<RomSetDetail>,
    pub images: Vec<GameImage>,
    pub genres: Vec<Genre>,
    pub collections: Vec<Collection>,
    pub is_favorite: bool,
}

async fn require_game(state: &AppState, id: i64) -> ApiResult<Game> {
    db::games::get_game(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Game {} not found", id)))
}

async fn game_detail(state: &AppState, game: Game) -> ApiResult<GameDetail> {
    let pool = &state.db;

    let mut rom_sets = Vec::new();
    for rom_set in db::rom_sets::list_rom_sets_for_game(pool, game.id).await? {
        let roms = db::roms::list_roms_for_rom_set(pool, rom_set.id).await?;
        rom_sets.push(RomSetDetail {
            is_default: game.default_rom_set_id == Some(rom_set.id),
            rom_set,
            roms,
        });
    }
    // Default first, then by region
    rom_sets.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.rom_set.region.cmp(&b.rom_set.region))
            .then_with(|| a.rom_set.id.cmp(&b.rom_set.id))
    });

    Ok(GameDetail {
        system: db::systems::get_system(pool, &game.system_slug).await?,
        images: db::images::list_images_for_game(pool, game.id).await?,
        genres: db::genres::genres_for_game(pool, game.id).await?,
        collections: db::collections::collections_containing_game(pool, &game.name, &game.system_slug).await?,
        is_favorite: collections::is_favorite(pool, &game).await?,
        rom_sets,
        game,
    })
}

/// GET /api/games/:id
pub async fn get_game(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<GameDetail>> {
    let game = require_game(&state, id).await?;
    Ok(Json(game_detail(&state, game).await?))
}

/// Editable game fields; absent fields are left unchanged
#[derive(Debug, Default, Deserialize)]
pub struct GameUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub release_date: Option<String>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub players: Option<String>,
    pub rating: Option<i64>,
    pub genres: Option<Vec<String>>,
}

/// PATCH /api/games/:id
pub async fn update_game(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<GameUpdate>,
) -> ApiResult<Json<GameDetail>> {
    let mut game = require_game(&state, id).await?;

    if let Some(name) = update.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(ApiError::BadRequest("Game name cannot be empty".to_string()));
        }
        if name != game.name {
            if let Some(other) = db::games::find_game_by_name(&state.db, &game.system_slug, name).await? {
                if other.id != game.id {
                    return Err(ApiError::Conflict(format!(
                        "A game named '{}' already exists in this system",
                        other.name
                    )));
                }
            }
            info!(game_id = id, from = %game.name, to = %name, "Renamed game");
            game.name = name.to_string();
            game.name_source = name_source::MANUAL.to_string();
        }
    }

    if let Some(rating) = update.rating {
        if !(0..=100).contains(&rating) {
            return Err(ApiError::BadRequest("Rating must be between 0 and 100".to_string()));
        }
        game.rating = Some(rating);
        game.rating_source = name_source::MANUAL.to_string();
    }
    if let Some(description) = update.description {
        game.description = description;
    }
    if let Some(release_date) = update.release_date {
        game.release_date = Some(release_date).filter(|d| !d.is_empty());
    }
    if let Some(developer) = update.developer {
        game.developer = developer;
    }
    if let Some(publisher) = update.publisher {
        game.publisher = publisher;
    }
    if let Some(players) = update.players {
        game.players = players;
    }
    db::games::save_game(&state.db, &game).await?;

    if let Some(genres) = &update.genres {
        let normalized = crate::library::genres::normalize_genres(genres);
        db::genres::add_game_genres(&state.db, game.id, &normalized).await?;
    }

    let game = require_game(&state, id).await?;
    Ok(Json(game_detail(&state, game).await?))
}

/// DELETE /api/games/:id
pub async fn delete_game(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    if !db::games::delete_game(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("Game {} not found", id)));
    }
    info!(game_id = id, "Deleted game");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DefaultRomSetRequest {
    pub rom_set_id: i64,
}

/// PUT /api/games/:id/default-romset
pub async fn set_default_romset(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<DefaultRomSetRequest>,
) -> ApiResult<Json<GameDetail>> {
    require_game(&state, id).await?;
    let rom_set = db::rom_sets::get_rom_set(&state.db, request.rom_set_id)
        .await?
        .filter(|rs| rs.game_id == id)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("ROM set {} does not belong to game {}", request.rom_set_id, id))
        })?;
    db::games::set_default_rom_set(&state.db, id, Some(rom_set.id)).await?;

    let game = require_game(&state, id).await?;
    Ok(Json(game_detail(&state, game).await?))
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub source_ids: Vec<i64>,
}

/// POST /api/games/:id/merge
pub async fn merge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<MergeRequest>,
) -> ApiResult<Json<MergeSummary>> {
    let summary = merge_games(&state.db, id, &request.source_ids).await?;
    state.event_bus.emit_lossy(RomhoardEvent::GamesMerged {
        target_id: id,
        merged_ids: request.source_ids.clone(),
        timestamp: Utc::now(),
    });
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub game_id: i64,
    pub is_favorite: bool,
}

/// POST /api/games/:id/favorite
pub async fn toggle_favorite(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<FavoriteResponse>> {
    let game = require_game(&state, id).await?;
    let is_favorite = collections::toggle_favorite(&state.db, &game).await?;
    Ok(Json(FavoriteResponse { game_id: id, is_favorite }))
}

#[derive(Debug, Deserialize)]
pub struct DuplicatesQuery {
    #[serde(default)]
    pub system: Option<String>,
}

/// GET /api/duplicates
pub async fn duplicates(
    State(state): State<AppState>,
    Query(query): Query<DuplicatesQuery>,
) -> ApiResult<Json<Vec<DuplicateGroup>>> {
    let system = query.system.as_deref().filter(|s| !s.is_empty());
    Ok(Json(find_duplicate_groups(&state.db, system).await?))
}

#[derive(Debug, Serialize)]
pub struct RecalculateResponse {
    pub changed: usize,
}

/// POST /api/romsets/recalculate
pub async fn recalculate(State(state): State<AppState>) -> ApiResult<Json<RecalculateResponse>> {
    let changed = recalculate_all_default_romsets(&state.db).await?;
    info!(changed, "Recalculated default ROM sets");
    Ok(Json(RecalculateResponse { changed }))
}

pub fn game_routes() -> Router<AppState> {
    Router::new()
        .route("/api/games/:id", get(get_game).patch(update_game).delete(delete_game))
        .route("/api/games/:id/default-romset", put(set_default_romset))
        .route("/api/games/:id/merge", post(merge))
        .route("/api/games/:id/favorite", post(toggle_favorite))
        .route("/api/duplicates", get(duplicates))
        .route("/api/romsets/recalculate", post(recalculate))
}
