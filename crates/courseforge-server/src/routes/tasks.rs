use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use courseforge_schema::TaskView;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/{task_id}", get(get_task))
        .route("/{task_id}/cancel", post(cancel_task))
        .route("/{task_id}/retry", post(retry_task))
}

fn owned_task(state: &AppState, task_id: &str, user: &courseforge_store::User) -> ApiResult<TaskView> {
    let task = state
        .tasks
        .get(task_id)
        .ok_or_else(|| ApiError::not_found("task"))?;
    if task.user_id != user.id && !user.is_admin {
        return Err(ApiError::not_found("task"));
    }
    Ok(task)
}

async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<TaskView>>> {
    Ok(Json(state.tasks.list_by_user(&user.id)))
}

async fn get_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    Ok(Json(owned_task(&state, &task_id, &user)?))
}

/// Signals cooperative cancellation; the running pipeline observes the token
/// at its next suspension point.
async fn cancel_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    owned_task(&state, &task_id, &user)?;
    let cancelled = state.tasks.cancel(&task_id);
    Ok(Json(serde_json::json!({ "task_id": task_id, "cancelled": cancelled })))
}

/// Re-runs the original request for a failed task.
async fn retry_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    owned_task(&state, &task_id, &user)?;
    let (task_user, course_id, request) = state
        .tasks
        .retry(&task_id)
        .ok_or_else(|| ApiError::Validation("only failed tasks can be retried".into()))?;

    let orchestrator = state.orchestrator.clone();
    let spawn_task_id = task_id.clone();
    tokio::spawn(async move {
        orchestrator
            .run(task_user, course_id, request, spawn_task_id)
            .await;
    });

    Ok(Json(owned_task(&state, &task_id, &user)?))
}
