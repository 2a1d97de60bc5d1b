use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use courseforge_schema::{CourseRequest, CourseStatus, UsageAction};
use courseforge_store::{ChapterUpdate, Course, CourseUpdate};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CourseInfoResponse {
    pub course_id: i64,
    pub total_time_hours: i64,
    pub status: CourseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub completed_chapter_count: i64,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl CourseInfoResponse {
    fn from_course(course: &Course, completed_chapter_count: i64) -> Self {
        Self {
            course_id: course.id,
            total_time_hours: course.total_time_hours,
            status: course.status,
            title: course.title.clone(),
            description: course.description.clone(),
            chapter_count: course.chapter_count,
            image_url: course.image_url.clone(),
            completed_chapter_count,
            is_public: course.is_public,
            created_at: course.created_at,
            task_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChapterResponse {
    pub id: i64,
    pub index: i64,
    pub caption: String,
    pub summary: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub time_minutes: i64,
    pub is_completed: bool,
}

impl From<&courseforge_store::Chapter> for ChapterResponse {
    fn from(chapter: &courseforge_store::Chapter) -> Self {
        Self {
            id: chapter.id,
            index: chapter.idx,
            caption: chapter.caption.clone(),
            summary: chapter.summary.clone().unwrap_or_default(),
            content: chapter.content.clone(),
            image_url: chapter.image_url.clone(),
            time_minutes: chapter.time_minutes,
            is_completed: chapter.is_completed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    200
}

#[derive(Debug, Deserialize)]
pub struct CourseUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublicStatusRequest {
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChapterUpdateRequest {
    pub caption: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub time_minutes: Option<i64>,
    pub image_url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_course))
        .route("/", get(list_courses))
        .route("/public", get(list_public_courses))
        .route("/{course_id}", get(get_course).put(update_course).delete(delete_course))
        .route("/{course_id}/public", patch(set_public_status))
        .route("/{course_id}/chapters", get(list_chapters))
        .route(
            "/{course_id}/chapters/{chapter_id}",
            get(get_chapter).put(update_chapter).delete(delete_chapter),
        )
        .route("/{course_id}/chapters/{chapter_id}/complete", patch(complete_chapter))
        .route("/{course_id}/chapters/{chapter_id}/incomplete", patch(incomplete_chapter))
}

/// Loads the course and enforces ownership. Missing and foreign rows are
/// indistinguishable to non-admins.
pub async fn verify_course_ownership(
    state: &AppState,
    course_id: i64,
    user: &courseforge_store::User,
) -> ApiResult<Course> {
    let course = state
        .store
        .get_course(course_id)
        .await?
        .ok_or_else(|| ApiError::not_found("course"))?;
    if course.user_id != user.id && !user.is_admin {
        return Err(ApiError::not_found("course"));
    }
    Ok(course)
}

async fn create_course(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CourseRequest>,
) -> ApiResult<Json<CourseInfoResponse>> {
    if request.query.trim().is_empty() {
        return Err(ApiError::Validation("query must not be empty".into()));
    }
    if request.time_hours == 0 {
        return Err(ApiError::Validation("time_hours must be positive".into()));
    }

    // Quota gate: fails fast with a typed 429 before any row or task exists.
    if let Some(quota) = courseforge_pipeline::check_course_quota(&state.store, &user, state.config).await? {
        return Err(ApiError::Quota(quota));
    }

    let course = state
        .store
        .create_course(
            &user.id,
            &request.query,
            request.time_hours as i64,
            &request.language,
            &request.difficulty,
        )
        .await?;

    let task_id = state.tasks.create(&user.id, course.id, request.clone());
    tracing::info!(
        "queueing course {} for user {} (task {task_id})",
        course.id,
        user.id
    );

    let orchestrator = state.orchestrator.clone();
    let user_id = user.id.clone();
    let course_id = course.id;
    let spawn_task_id = task_id.clone();
    tokio::spawn(async move {
        orchestrator
            .run(user_id, course_id, request, spawn_task_id)
            .await;
    });

    let mut response = CourseInfoResponse::from_course(&course, 0);
    response.task_id = Some(task_id);
    Ok(Json(response))
}

async fn list_courses(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<CourseInfoResponse>>> {
    let courses = state
        .store
        .list_courses_by_user(&user.id, page.skip, page.limit)
        .await?;
    let mut views = Vec::with_capacity(courses.len());
    for course in &courses {
        let completed = state.store.count_completed_chapters(course.id).await?;
        views.push(CourseInfoResponse::from_course(course, completed));
    }
    Ok(Json(views))
}

async fn list_public_courses(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<CourseInfoResponse>>> {
    let courses = state
        .store
        .list_public_courses(page.skip, page.limit.min(100))
        .await?;
    let views = courses
        .iter()
        .map(|course| CourseInfoResponse::from_course(course, 0))
        .collect();
    Ok(Json(views))
}

async fn get_course(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<CourseInfoResponse>> {
    let course = verify_course_ownership(&state, course_id, &user).await?;
    let completed = state.store.count_completed_chapters(course.id).await?;
    Ok(Json(CourseInfoResponse::from_course(&course, completed)))
}

async fn update_course(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(course_id): Path<i64>,
    Json(request): Json<CourseUpdateRequest>,
) -> ApiResult<Json<CourseInfoResponse>> {
    let course = verify_course_ownership(&state, course_id, &user).await?;
    if !course.status.is_terminal() {
        return Err(ApiError::Validation(
            "course is still being generated".into(),
        ));
    }

    let updated = state
        .store
        .update_course(
            course_id,
            CourseUpdate {
                title: request.title,
                description: request.description,
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found("course"))?;
    let completed = state.store.count_completed_chapters(course_id).await?;
    Ok(Json(CourseInfoResponse::from_course(&updated, completed)))
}

async fn set_public_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(course_id): Path<i64>,
    Json(request): Json<PublicStatusRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_course_ownership(&state, course_id, &user).await?;
    state.store.set_course_public(course_id, request.is_public).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Course public status updated to {}", request.is_public)
    })))
}

async fn delete_course(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let course = verify_course_ownership(&state, course_id, &user).await?;
    if !course.status.is_terminal() {
        return Err(ApiError::Validation(
            "course is still being generated".into(),
        ));
    }
    state.store.delete_course(course_id).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Course '{}' has been deleted", course.title.unwrap_or_default()),
        "course_id": course_id,
    })))
}

async fn list_chapters(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<Vec<ChapterResponse>>> {
    verify_course_ownership(&state, course_id, &user).await?;
    let chapters = state.store.list_chapters(course_id).await?;
    Ok(Json(chapters.iter().map(ChapterResponse::from).collect()))
}

async fn get_chapter(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((course_id, chapter_id)): Path<(i64, i64)>,
) -> ApiResult<Json<ChapterResponse>> {
    verify_course_ownership(&state, course_id, &user).await?;
    let chapter = state
        .store
        .get_chapter_in_course(course_id, chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    Ok(Json(ChapterResponse::from(&chapter)))
}

async fn update_chapter(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((course_id, chapter_id)): Path<(i64, i64)>,
    Json(request): Json<ChapterUpdateRequest>,
) -> ApiResult<Json<ChapterResponse>> {
    verify_course_ownership(&state, course_id, &user).await?;
    state
        .store
        .get_chapter_in_course(course_id, chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;

    if request.caption.is_none()
        && request.summary.is_none()
        && request.content.is_none()
        && request.time_minutes.is_none()
        && request.image_url.is_none()
    {
        return Err(ApiError::Validation("no update data provided".into()));
    }

    let updated = state
        .store
        .update_chapter(
            chapter_id,
            ChapterUpdate {
                caption: request.caption,
                summary: request.summary,
                content: request.content,
                time_minutes: request.time_minutes,
                image_url: request.image_url,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    Ok(Json(ChapterResponse::from(&updated)))
}

async fn delete_chapter(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((course_id, chapter_id)): Path<(i64, i64)>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_course_ownership(&state, course_id, &user).await?;
    let chapter = state
        .store
        .get_chapter_in_course(course_id, chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    state.store.delete_chapter(chapter_id).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Chapter '{}' has been deleted", chapter.caption),
        "chapter_id": chapter_id,
        "course_id": course_id,
    })))
}

async fn complete_chapter(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((course_id, chapter_id)): Path<(i64, i64)>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_course_ownership(&state, course_id, &user).await?;
    let chapter = state
        .store
        .get_chapter_in_course(course_id, chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    state.store.set_chapter_completed(chapter_id, true).await?;
    state
        .store
        .log_usage(
            &user.id,
            UsageAction::CompleteChapter,
            Some(course_id),
            Some(chapter_id),
            None,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "message": format!("Chapter '{}' marked as completed", chapter.caption),
        "chapter_id": chapter_id,
        "is_completed": true,
    })))
}

async fn incomplete_chapter(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((course_id, chapter_id)): Path<(i64, i64)>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_course_ownership(&state, course_id, &user).await?;
    let chapter = state
        .store
        .get_chapter_in_course(course_id, chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    state.store.set_chapter_completed(chapter_id, false).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Chapter '{}' marked as incomplete", chapter.caption),
        "chapter_id": chapter_id,
        "is_completed": false,
    })))
}
