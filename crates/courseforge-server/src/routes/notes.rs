use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use courseforge_store::Note;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::courses::verify_course_ownership;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub course_id: i64,
    pub chapter_id: i64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNoteRequest {
    pub text: String,
}

pub fn router() -> Router<AppState> {
    // The id segment is a chapter id for GET and a note id for PUT/DELETE.
    Router::new()
        .route("/", post(create_note))
        .route("/{id}", get(list_notes).put(update_note).delete(delete_note))
}

async fn create_note(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreateNoteRequest>,
) -> ApiResult<Json<Note>> {
    if request.text.trim().is_empty() {
        return Err(ApiError::Validation("note text must not be empty".into()));
    }
    verify_course_ownership(&state, request.course_id, &user).await?;
    state
        .store
        .get_chapter_in_course(request.course_id, request.chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;

    let note = state
        .store
        .create_note(request.course_id, request.chapter_id, &user.id, &request.text)
        .await?;
    Ok(Json(note))
}

async fn list_notes(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(chapter_id): Path<i64>,
) -> ApiResult<Json<Vec<Note>>> {
    let notes = state.store.list_notes(chapter_id, &user.id).await?;
    Ok(Json(notes))
}

async fn load_owned_note(state: &AppState, note_id: i64, user_id: &str) -> ApiResult<Note> {
    state
        .store
        .get_note(note_id)
        .await?
        .filter(|note| note.user_id == user_id)
        .ok_or_else(|| ApiError::not_found("note"))
}

async fn update_note(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(note_id): Path<i64>,
    Json(request): Json<UpdateNoteRequest>,
) -> ApiResult<Json<Note>> {
    if request.text.trim().is_empty() {
        return Err(ApiError::Validation("note text must not be empty".into()));
    }
    load_owned_note(&state, note_id, &user.id).await?;
    let note = state
        .store
        .update_note(note_id, &request.text)
        .await?
        .ok_or_else(|| ApiError::not_found("note"))?;
    Ok(Json(note))
}

async fn delete_note(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(note_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    load_owned_note(&state, note_id, &user.id).await?;
    state.store.delete_note(note_id).await?;
    Ok(Json(serde_json::json!({ "detail": "note deleted", "note_id": note_id })))
}
