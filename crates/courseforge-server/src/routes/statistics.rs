use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use courseforge_schema::UsageAction;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UsagePost {
    pub user_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub course_id: Option<i64>,
    #[serde(default)]
    pub chapter_id: Option<i64>,
    /// true when the tab became visible, false when it was hidden.
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn default_visible() -> bool {
    true
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/usage", post(post_usage))
        .route("/{user_id}/total_learn_time", get(total_learn_time))
}

/// Writes one site_visible / site_hidden event. Learn time is later derived
/// from the visible events that carry both course and chapter.
async fn post_usage(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    Json(usage): Json<UsagePost>,
) -> ApiResult<Json<serde_json::Value>> {
    if usage.user_id != current.id && !current.is_admin {
        return Err(ApiError::Forbidden(
            "cannot log usage for another user".into(),
        ));
    }

    let action = if usage.visible {
        UsageAction::SiteVisible
    } else {
        UsageAction::SiteHidden
    };
    let event = state
        .store
        .log_usage(
            &usage.user_id,
            action,
            usage.course_id,
            usage.chapter_id,
            usage.url.clone(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "id": event.id, "action": event.action })))
}

async fn total_learn_time(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<i64>> {
    if user_id != current.id && !current.is_admin {
        return Err(ApiError::Forbidden("not your statistics".into()));
    }
    let minutes = state.store.total_learn_time_minutes(&user_id).await?;
    Ok(Json(minutes))
}
