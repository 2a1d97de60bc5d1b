use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::response::{AppendHeaders, IntoResponse};
use axum::routing::post;
use axum::{Json, Router};
use courseforge_schema::UsageAction;
use courseforge_store::NewUser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{
    access_cookie, clear_access_cookie, clear_refresh_cookie, cookie_value, create_token,
    decode_token, hash_password, refresh_cookie, verify_password, AuthUser, REFRESH_COOKIE,
};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email address.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub login_streak: i64,
}

impl From<&courseforge_store::User> for UserResponse {
    fn from(user: &courseforge_store::User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            login_streak: user.login_streak,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
}

async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> ApiResult<Json<UserResponse>> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(ApiError::Validation("username must not be empty".into()));
    }
    if !request.email.contains('@') {
        return Err(ApiError::Validation("invalid email address".into()));
    }
    if let Some(violation) = state.config.password_policy.check(&request.password) {
        return Err(ApiError::Validation(violation.into()));
    }
    if state.store.get_user_by_username(username).await?.is_some() {
        return Err(ApiError::Validation("username already taken".into()));
    }
    if state.store.get_user_by_email(&request.email).await?.is_some() {
        return Err(ApiError::Validation("email already registered".into()));
    }

    let user = state
        .store
        .create_user(NewUser {
            id: Uuid::new_v4().to_string(),
            username: username.to_owned(),
            email: request.email.clone(),
            hashed_password: hash_password(&request.password)?,
            is_admin: false,
        })
        .await?;

    Ok(Json(UserResponse::from(&user)))
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .store
        .get_user_by_login(request.username.trim())
        .await?
        .filter(|user| verify_password(&request.password, &user.hashed_password))
        .ok_or_else(|| ApiError::Unauthorized("incorrect username or password".into()))?;
    if !user.is_active {
        return Err(ApiError::Unauthorized("inactive user".into()));
    }

    let user = state
        .store
        .record_login(&user.id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("user no longer exists".into()))?;
    state
        .store
        .log_usage(&user.id, UsageAction::Login, None, None, None)
        .await?;

    let access = create_token(
        state.config,
        &user.id,
        "access",
        state.config.jwt.access_ttl_minutes,
    )?;
    let refresh = create_token(
        state.config,
        &user.id,
        "refresh",
        state.config.jwt.refresh_ttl_minutes,
    )?;

    Ok((
        AppendHeaders([
            (SET_COOKIE, access_cookie(state.config, &access)),
            (SET_COOKIE, refresh_cookie(state.config, &refresh)),
        ]),
        Json(UserResponse::from(&user)),
    ))
}

async fn logout(
    State(state): State<AppState>,
    user: Result<AuthUser, ApiError>,
) -> ApiResult<impl IntoResponse> {
    if let Ok(AuthUser(user)) = user {
        state
            .store
            .log_usage(&user.id, UsageAction::Logout, None, None, None)
            .await?;
    }
    Ok((
        AppendHeaders([
            (SET_COOKIE, clear_access_cookie(state.config)),
            (SET_COOKIE, clear_refresh_cookie(state.config)),
        ]),
        Json(serde_json::json!({ "detail": "logged out" })),
    ))
}

async fn refresh(State(state): State<AppState>, parts: Parts) -> ApiResult<impl IntoResponse> {
    let token = cookie_value(&parts, REFRESH_COOKIE)
        .ok_or_else(|| ApiError::Unauthorized("missing refresh token".into()))?;
    let claims = decode_token(state.config, &token, "refresh")
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    let user = state
        .store
        .get_user(&claims.sub)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| ApiError::Unauthorized("inactive user".into()))?;

    state
        .store
        .log_usage(&user.id, UsageAction::Refresh, None, None, None)
        .await?;

    let access = create_token(
        state.config,
        &user.id,
        "access",
        state.config.jwt.access_ttl_minutes,
    )?;
    Ok((
        AppendHeaders([(SET_COOKIE, access_cookie(state.config, &access))]),
        Json(UserResponse::from(&user)),
    ))
}
