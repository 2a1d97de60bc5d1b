use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use courseforge_store::{User, UserUpdate};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, verify_password, AdminUser, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::routes::courses::Pagination;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UserDetailResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub login_streak: i64,
    pub total_learn_time_minutes: i64,
}

impl UserDetailResponse {
    fn new(user: &User, total_learn_time_minutes: i64) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            is_active: user.is_active,
            is_admin: user.is_admin,
            login_streak: user.login_streak,
            total_learn_time_minutes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UserUpdateRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub new_password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/", get(list_users))
        .route("/{user_id}", get(get_user).put(update_user).delete(delete_user))
        .route("/{user_id}/change_password", put(change_password))
}

fn ensure_self_or_admin(current: &User, target_id: &str) -> ApiResult<()> {
    if current.id != target_id && !current.is_admin {
        return Err(ApiError::not_found("user"));
    }
    Ok(())
}

async fn me(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Json<UserDetailResponse>> {
    let learn_time = state.store.total_learn_time_minutes(&user.id).await?;
    Ok(Json(UserDetailResponse::new(&user, learn_time)))
}

/// Admin listing, including the coarse learn-time estimate per user.
async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<UserDetailResponse>>> {
    let users = state.store.list_users(page.skip, page.limit).await?;
    let mut views = Vec::with_capacity(users.len());
    for user in &users {
        let learn_time = state.store.total_learn_time_minutes(&user.id).await?;
        views.push(UserDetailResponse::new(user, learn_time));
    }
    Ok(Json(views))
}

async fn get_user(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserDetailResponse>> {
    ensure_self_or_admin(&current, &user_id)?;
    let user = state
        .store
        .get_user(&user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;
    let learn_time = state.store.total_learn_time_minutes(&user.id).await?;
    Ok(Json(UserDetailResponse::new(&user, learn_time)))
}

async fn update_user(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    Path(user_id): Path<String>,
    Json(request): Json<UserUpdateRequest>,
) -> ApiResult<Json<UserDetailResponse>> {
    ensure_self_or_admin(&current, &user_id)?;
    // Only admins can toggle the active flag.
    let is_active = if current.is_admin { request.is_active } else { None };

    let updated = state
        .store
        .update_user(
            &user_id,
            UserUpdate {
                username: request.username,
                email: request.email,
                is_active,
                is_admin: None,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;
    let learn_time = state.store.total_learn_time_minutes(&updated.id).await?;
    Ok(Json(UserDetailResponse::new(&updated, learn_time)))
}

async fn change_password(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    Path(user_id): Path<String>,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ensure_self_or_admin(&current, &user_id)?;
    if let Some(violation) = state.config.password_policy.check(&request.new_password) {
        return Err(ApiError::Validation(violation.into()));
    }

    let target = state
        .store
        .get_user(&user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;

    // Users must prove they know their current password; admins reset freely.
    if !current.is_admin {
        let old = request
            .old_password
            .as_deref()
            .ok_or_else(|| ApiError::Validation("old_password is required".into()))?;
        if !verify_password(old, &target.hashed_password) {
            return Err(ApiError::Unauthorized("incorrect password".into()));
        }
    }

    state
        .store
        .change_password(&user_id, hash_password(&request.new_password)?)
        .await?;
    Ok(Json(serde_json::json!({ "detail": "password changed" })))
}

/// Administrative deletion cascading through everything the user owns.
async fn delete_user(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    ensure_self_or_admin(&current, &user_id)?;
    let deleted = state.store.delete_user_cascade(&user_id).await?;
    if !deleted {
        return Err(ApiError::not_found("user"));
    }
    Ok(Json(serde_json::json!({ "detail": "user deleted", "user_id": user_id })))
}
