use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use courseforge_schema::UsageAction;
use courseforge_store::SearchHit;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

const SEARCH_RESULT_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/search", get(search))
}

/// Combined course/chapter search over the caller's rows, title matches
/// first. Queries shorter than two characters return nothing and are not
/// logged.
async fn search(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let trimmed = query.query.trim();
    if trimmed.chars().count() < 2 {
        return Ok(Json(Vec::new()));
    }

    let hits = state
        .store
        .search_courses_and_chapters(&user.id, trimmed, SEARCH_RESULT_LIMIT)
        .await?;

    state
        .store
        .log_usage(
            &user.id,
            UsageAction::Search,
            None,
            None,
            Some(trimmed.to_string()),
        )
        .await?;

    Ok(Json(hits))
}
