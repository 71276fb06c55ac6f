//! System browser, per-system game lists, global search and genres

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::pagination::{PageParams, Pagination};
use crate::db;
use crate::db::games::{GameFilter, GameListItem, GameSort, RatingFilter};
use crate::db::genres::GenreCount;
use crate::db::systems::SystemSummary;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RatingParams {
    #[serde(default)]
    pub rating_op: Option<String>,
    #[serde(default)]
    pub rating_min: Option<String>,
    #[serde(default)]
    pub rating_max: Option<String>,
}

impl RatingParams {
    /// Filter from the query; anything unparsable disables it
    pub fn filter(&self) -> Option<RatingFilter> {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<i64>().ok());
        let min = parse(&self.rating_min);
        let max = parse(&self.rating_max);
        match self.rating_op.as_deref()? {
            "gte" => min.map(RatingFilter::Gte),
            "lte" => min.or(max).map(RatingFilter::Lte),
            "eq" => min.map(RatingFilter::Eq),
            "between" => match (min, max) {
                (Some(a), Some(b)) if a <= b => Some(RatingFilter::Between(a, b)),
                _ => None,
            },
            _ => None,
        }
    }
}

fn genre_slugs(param: Option<&str>) -> Vec<String> {
    param
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Run a filtered query for the clamped page
async fn paged_games(
    state: &AppState,
    mut filter: GameFilter,
    page: &PageParams,
) -> ApiResult<(Vec<GameListItem>, Pagination)> {
    let requested_page = page.requested_page().max(1);
    filter.limit = page.page_size();
    filter.offset = (requested_page - 1).saturating_mul(filter.limit);
    let (games, total) = db::games::query_games(&state.db, &filter).await?;

    let pagination = Pagination::from_params(page, total);
    if pagination.page == requested_page {
        return Ok((games, pagination));
    }
    // Requested page was past the end
    filter.offset = pagination.offset();
    let (games, _) = db::games::query_games(&state.db, &filter).await?;
    Ok((games, pagination))
}

#[derive(Debug, Deserialize)]
pub struct SystemListQuery {
    #[serde(default)]
    pub q: Option<String>,
}

/// GET /api/systems
pub async fn list_systems(
    State(state): State<AppState>,
    Query(query): Query<SystemListQuery>,
) -> ApiResult<Json<Vec<SystemSummary>>> {
    Ok(Json(db::systems::list_systems_with_games(&state.db, query.q.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
pub struct SystemGamesQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SystemGamesResponse {
    pub system: crate::models::System,
    pub games: Vec<GameListItem>,
    pub pagination: Pagination,
}

/// GET /api/systems/:slug/games
pub async fn system_games(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<SystemGamesQuery>,
    Query(page): Query<PageParams>,
    Query(rating): Query<RatingParams>,
) -> ApiResult<Json<SystemGamesResponse>> {
    let system = db::systems::get_system(&state.db, &slug)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("System '{}' not found", slug)))?;

    let sort = match query.sort.as_deref() {
        Some("rating") => GameSort::Rating,
        _ => GameSort::Name,
    };
    let filter = GameFilter {
        system: Some(system.slug.clone()),
        query: query.q.clone(),
        genres: genre_slugs(query.genre.as_deref()),
        rating: rating.filter(),
        sort,
        descending: query.order.as_deref() == Some("desc"),
        ..Default::default()
    };
    let (games, pagination) = paged_games(&state, filter, &page).await?;

    Ok(Json(SystemGamesResponse {
        system,
        games,
        pagination,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub games: Vec<GameListItem>,
    pub systems: Vec<SystemSummary>,
    pub pagination: Pagination,
}

/// GET /api/search
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Query(page): Query<PageParams>,
    Query(rating): Query<RatingParams>,
) -> ApiResult<Json<SearchResponse>> {
    let q = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let filter = GameFilter {
        system: query.system.clone().filter(|s| !s.is_empty()),
        query: q.map(String::from),
        match_genre_names: true,
        genres: genre_slugs(query.genre.as_deref()),
        rating: rating.filter(),
        sort: GameSort::SystemThenName,
        ..Default::default()
    };
    let (games, pagination) = paged_games(&state, filter, &page).await?;

    let systems = match q {
        Some(q) => db::systems::list_systems_with_games(&state.db, Some(q)).await?,
        None => Vec::new(),
    };

    Ok(Json(SearchResponse {
        games,
        systems,
        pagination,
    }))
}

/// GET /api/genres
pub async fn list_genres(State(state): State<AppState>) -> ApiResult<Json<Vec<GenreCount>>> {
    Ok(Json(db::genres::list_genres_with_counts(&state.db).await?))
}

pub fn system_routes() -> Router<AppState> {
    Router::new()
        .route("/api/systems", get(list_systems))
        .route("/api/systems/:slug/games", get(system_games))
        .route("/api/search", get(search))
        .route("/api/genres", get(list_genres))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(op: &str, min: &str, max: &str) -> Option<RatingFilter> {
        RatingParams {
            rating_op: Some(op.into()),
            rating_min: Some(min.into()),
            rating_max: Some(max.into()),
        }
        .filter()
    }

    #[test]
    fn test_rating_params() {
        assert_eq!(rating("gte", "15", ""), Some(RatingFilter::Gte(15)));
        assert_eq!(rating("between", "10", "18"), Some(RatingFilter::Between(10, 18)));
        assert_eq!(rating("between", "18", "10"), None);
        assert_eq!(rating("gte", "abc", ""), None);
        assert_eq!(rating("bogus", "5", "6"), None);
        assert_eq!(RatingParams::default().filter(), None);
    }

    #[test]
    fn test_genre_slugs() {
        assert_eq!(genre_slugs(Some("rpg, action,,")), vec!["rpg", "action"]);
        assert!(genre_slugs(None).is_empty());
    }
}
