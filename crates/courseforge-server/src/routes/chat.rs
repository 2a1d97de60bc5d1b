use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::header::{HeaderName, CACHE_CONTROL, CONNECTION};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use courseforge_provider::LlmMessage;
use courseforge_schema::UsageAction;
use futures_core::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub images: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{chapter_id}", post(chat_with_agent))
}

/// Streams the chat answer for one chapter as Server-Sent Events:
/// `data: {"content": "..."}` per chunk, `data: [DONE]` at the end, errors
/// as an `error` event. Transient mid-stream failures never become HTTP
/// errors; the stream itself reports them.
async fn chat_with_agent(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(chapter_id): Path<i64>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::Validation("message cannot be empty".into()));
    }
    if message.chars().count() > state.config.max_chat_message_len {
        return Err(ApiError::Validation(format!(
            "message too long, max {} characters allowed",
            state.config.max_chat_message_len
        )));
    }

    let chapter = state
        .store
        .get_chapter(chapter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    let course = state
        .store
        .get_course(chapter.course_id)
        .await?
        .ok_or_else(|| ApiError::not_found("course"))?;
    if !course.is_public && course.user_id != user.id && !user.is_admin {
        return Err(ApiError::Forbidden(
            "you do not have access to this chapter".into(),
        ));
    }

    state
        .store
        .log_usage(
            &user.id,
            UsageAction::Chat,
            Some(course.id),
            Some(chapter_id),
            Some(message.clone()),
        )
        .await?;
    // History is captured before the new turn is persisted so the prompt
    // carries the message exactly once.
    let history: Vec<LlmMessage> = state
        .store
        .list_chat_messages(course.id, &user.id, 20)
        .await?
        .into_iter()
        .map(|m| LlmMessage {
            role: m.role,
            content: m.content,
        })
        .collect();
    state
        .store
        .insert_chat_message(course.id, &user.id, "user", &message)
        .await?;

    let agent_state = serde_json::json!({ "chapter_content": chapter.content });
    let upstream = state
        .orchestrator
        .agents()
        .chat
        .stream(&user.id, chapter_id, agent_state, history, &message)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    let store = state.store.clone();
    let user_id = user.id.clone();
    let course_id = course.id;

    let sse_stream: std::pin::Pin<
        Box<dyn Stream<Item = Result<Event, Infallible>> + Send>,
    > = Box::pin(async_stream::stream! {
        let mut upstream = upstream;
        let mut assistant_reply = String::new();

        while let Some(item) = upstream.next().await {
            match item {
                Ok((chunk, true)) => {
                    if !chunk.is_empty() {
                        assistant_reply.push_str(&chunk);
                        yield Ok(Event::default().data(
                            serde_json::json!({ "content": chunk }).to_string(),
                        ));
                    }
                    // Persist the assistant turn before closing the stream.
                    if !assistant_reply.is_empty() {
                        if let Err(e) = store
                            .insert_chat_message(course_id, &user_id, "assistant", &assistant_reply)
                            .await
                        {
                            tracing::warn!("failed to persist assistant chat turn: {e}");
                        }
                    }
                    yield Ok(Event::default().data("[DONE]"));
                    return;
                }
                Ok((chunk, false)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    assistant_reply.push_str(&chunk);
                    yield Ok(Event::default().data(
                        serde_json::json!({ "content": chunk }).to_string(),
                    ));
                }
                Err(e) => {
                    tracing::error!("chat stream error: {e}");
                    yield Ok(Event::default().event("error").data(
                        serde_json::json!({
                            "error": "An error occurred while processing your message"
                        })
                        .to_string(),
                    ));
                    return;
                }
            }
        }

        // Provider closed without a final marker; still terminate cleanly.
        if !assistant_reply.is_empty() {
            if let Err(e) = store
                .insert_chat_message(course_id, &user_id, "assistant", &assistant_reply)
                .await
            {
                tracing::warn!("failed to persist assistant chat turn: {e}");
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    });

    Ok((
        [
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(sse_stream),
    ))
}
