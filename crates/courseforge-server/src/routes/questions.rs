use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use courseforge_schema::QuestionKind;
use courseforge_store::PracticeQuestion;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::courses::verify_course_ownership;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QuestionResponse {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub question: String,
    pub answer_a: Option<String>,
    pub answer_b: Option<String>,
    pub answer_c: Option<String>,
    pub answer_d: Option<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub users_answer: Option<String>,
    pub points_received: Option<i64>,
    pub feedback: Option<String>,
}

impl From<&PracticeQuestion> for QuestionResponse {
    fn from(question: &PracticeQuestion) -> Self {
        Self {
            id: question.id,
            kind: question.kind,
            question: question.question.clone(),
            answer_a: question.answer_a.clone(),
            answer_b: question.answer_b.clone(),
            answer_c: question.answer_c.clone(),
            answer_d: question.answer_d.clone(),
            correct_answer: question.correct_answer.clone(),
            explanation: question.explanation.clone(),
            users_answer: question.users_answer.clone(),
            points_received: question.points_received,
            feedback: question.feedback.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnswerQuery {
    pub users_answer: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{course_id}/chapters/{chapter_id}", get(list_questions))
        .route(
            "/{course_id}/chapters/{chapter_id}/{question_id}/save",
            get(save_answer),
        )
        .route(
            "/{course_id}/chapters/{chapter_id}/{question_id}/feedback",
            get(feedback),
        )
}

async fn load_question(
    state: &AppState,
    course_id: i64,
    chapter_id: i64,
    question_id: i64,
) -> ApiResult<PracticeQuestion> {
    state
        .store
        .get_chapter_in_course(course_id, chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    let question = state
        .store
        .get_question(question_id)
        .await?
        .filter(|q| q.chapter_id == chapter_id)
        .ok_or_else(|| ApiError::not_found("question"))?;
    Ok(question)
}

async fn list_questions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((course_id, chapter_id)): Path<(i64, i64)>,
) -> ApiResult<Json<Vec<QuestionResponse>>> {
    verify_course_ownership(&state, course_id, &user).await?;
    state
        .store
        .get_chapter_in_course(course_id, chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    let questions = state.store.list_questions(chapter_id).await?;
    Ok(Json(questions.iter().map(QuestionResponse::from).collect()))
}

async fn save_answer(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((course_id, chapter_id, question_id)): Path<(i64, i64, i64)>,
    Query(query): Query<AnswerQuery>,
) -> ApiResult<Json<QuestionResponse>> {
    verify_course_ownership(&state, course_id, &user).await?;
    load_question(&state, course_id, chapter_id, question_id).await?;

    state.store.save_answer(question_id, &query.users_answer).await?;
    let question = state
        .store
        .get_question(question_id)
        .await?
        .ok_or_else(|| ApiError::not_found("question"))?;
    Ok(Json(QuestionResponse::from(&question)))
}

/// Saves the answer, runs the grader and persists points plus feedback.
async fn feedback(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((course_id, chapter_id, question_id)): Path<(i64, i64, i64)>,
    Query(query): Query<AnswerQuery>,
) -> ApiResult<Json<QuestionResponse>> {
    verify_course_ownership(&state, course_id, &user).await?;
    let question = load_question(&state, course_id, chapter_id, question_id).await?;

    let grade = state
        .orchestrator
        .grade(
            &user.id,
            course_id,
            chapter_id,
            &question.question,
            &question.correct_answer,
            &query.users_answer,
        )
        .await?;

    state
        .store
        .save_feedback(
            question_id,
            &query.users_answer,
            grade.points.min(2) as i64,
            &grade.explanation,
        )
        .await?;
    let updated = state
        .store
        .get_question(question_id)
        .await?
        .ok_or_else(|| ApiError::not_found("question"))?;
    Ok(Json(QuestionResponse::from(&updated)))
}
