use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use courseforge_provider::{LlmMessage, LlmProvider, LlmRequest, StreamChunk};
use futures_core::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_stream::StreamExt;

use crate::session::SessionService;
use crate::state::CourseState;
use crate::AgentError;

const DEFAULT_MAX_RETRIES: u32 = 1;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_TOKENS: u32 = 8_192;

/// Substitutes `{field}` placeholders in an instruction template from the
/// working-state snapshot, the way dynamic instructions are rendered before
/// each call.
fn render_instruction(template: &str, state: &Value) -> String {
    let Some(map) = state.as_object() else {
        return template.to_string();
    };
    let mut rendered = template.to_string();
    for (key, value) in map {
        let placeholder = format!("{{{key}}}");
        if !rendered.contains(&placeholder) {
            continue;
        }
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        };
        rendered = rendered.replace(&placeholder, &replacement);
    }
    rendered
}

/// Unstructured text agent. One model call per attempt, fresh session each
/// time; transient failures (transport errors, empty responses) are retried
/// after a fixed delay, then surfaced as [`AgentError::Exhausted`].
#[derive(Clone)]
pub struct StandardAgent {
    app_name: String,
    provider: Arc<dyn LlmProvider>,
    sessions: SessionService,
    model: String,
    instruction: String,
    max_retries: u32,
    retry_delay: Duration,
    max_tokens: u32,
    response_hook: Option<Arc<dyn Fn(&str) -> String + Send + Sync>>,
}

impl StandardAgent {
    pub fn new(
        app_name: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        sessions: SessionService,
        model: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            provider,
            sessions,
            model: model.into(),
            instruction: instruction.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_tokens: DEFAULT_MAX_TOKENS,
            response_hook: None,
        }
    }

    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Post-model hook applied to the final text before it is returned.
    pub fn with_response_hook(
        mut self,
        hook: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.response_hook = Some(Arc::new(hook));
        self
    }

    pub async fn run(
        &self,
        user_id: &str,
        state: &CourseState,
        content: &str,
    ) -> Result<String, AgentError> {
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let snapshot = state.snapshot();
            let session = self.sessions.create(&self.app_name, user_id, snapshot.clone());
            let request = LlmRequest {
                model: self.model.clone(),
                system: Some(render_instruction(&self.instruction, &snapshot)),
                messages: vec![LlmMessage::user(content)],
                max_tokens: self.max_tokens,
                json_mode: false,
            };

            match self.provider.chat(request).await {
                Ok(resp) if resp.text.trim().is_empty() => {
                    last_error = "agent did not give a final response".to_string();
                }
                Ok(resp) => {
                    self.sessions.remove(&session.id);
                    let text = match &self.response_hook {
                        Some(hook) => hook(&resp.text),
                        None => resp.text,
                    };
                    return Ok(text);
                }
                Err(e) => {
                    last_error = format!("{e:#}");
                }
            }

            self.sessions.remove(&session.id);
            if attempt + 1 < attempts {
                tracing::warn!(
                    "agent {} attempt {}/{attempts} failed, retrying: {last_error}",
                    self.app_name,
                    attempt + 1
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(AgentError::Exhausted {
            attempts,
            last_error,
        })
    }
}

/// Agent whose output is constrained to a declared schema. The text payload
/// is parsed as JSON; a parse failure counts as transient and burns a retry
/// like any transport error.
#[derive(Clone)]
pub struct StructuredAgent<T> {
    app_name: String,
    provider: Arc<dyn LlmProvider>,
    sessions: SessionService,
    model: String,
    instruction: String,
    max_retries: u32,
    retry_delay: Duration,
    max_tokens: u32,
    _output: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StructuredAgent<T> {
    pub fn new(
        app_name: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        sessions: SessionService,
        model: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            provider,
            sessions,
            model: model.into(),
            instruction: instruction.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_tokens: DEFAULT_MAX_TOKENS,
            _output: PhantomData,
        }
    }

    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub async fn run(
        &self,
        user_id: &str,
        state: &CourseState,
        content: &str,
    ) -> Result<T, AgentError> {
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let snapshot = state.snapshot();
            let session = self.sessions.create(&self.app_name, user_id, snapshot.clone());
            let request = LlmRequest {
                model: self.model.clone(),
                system: Some(render_instruction(&self.instruction, &snapshot)),
                messages: vec![LlmMessage::user(content)],
                max_tokens: self.max_tokens,
                json_mode: true,
            };

            let outcome = self.provider.chat(request).await;
            self.sessions.remove(&session.id);

            match outcome {
                Ok(resp) if resp.text.trim().is_empty() => {
                    last_error = "agent did not give a final response".to_string();
                }
                Ok(resp) => match serde_json::from_str::<T>(strip_code_fences(&resp.text)) {
                    Ok(parsed) => return Ok(parsed),
                    Err(e) => {
                        last_error = format!("error parsing JSON response: {e}");
                    }
                },
                Err(e) => {
                    last_error = format!("{e:#}");
                }
            }

            if attempt + 1 < attempts {
                tracing::warn!(
                    "agent {} attempt {}/{attempts} failed, retrying: {last_error}",
                    self.app_name,
                    attempt + 1
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(AgentError::Exhausted {
            attempts,
            last_error,
        })
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// Streaming chat agent bound to a persistent session per
/// `(app_name, user, chapter)`.
#[derive(Clone)]
pub struct ChatAgent {
    app_name: String,
    provider: Arc<dyn LlmProvider>,
    sessions: SessionService,
    model: String,
    instruction: String,
    max_tokens: u32,
}

impl ChatAgent {
    pub fn new(
        app_name: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        sessions: SessionService,
        model: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            provider,
            sessions,
            model: model.into(),
            instruction: instruction.into(),
            max_tokens: 2_048,
        }
    }

    /// Streams `(text_chunk, is_final)` pairs. The final pair carries an
    /// empty chunk.
    pub async fn stream(
        &self,
        user_id: &str,
        chapter_id: i64,
        state: Value,
        history: Vec<LlmMessage>,
        content: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = anyhow::Result<(String, bool)>> + Send>>, AgentError>
    {
        let _session =
            self.sessions
                .get_or_create_chat(&self.app_name, user_id, chapter_id, state.clone());

        let mut messages = history;
        messages.push(LlmMessage::user(content));

        let request = LlmRequest {
            model: self.model.clone(),
            system: Some(render_instruction(&self.instruction, &state)),
            messages,
            max_tokens: self.max_tokens,
            json_mode: false,
        };

        let stream = self
            .provider
            .stream(request)
            .await
            .map_err(|e| AgentError::Exhausted {
                attempts: 1,
                last_error: format!("{e:#}"),
            })?;

        let mapped = stream.map(|chunk| {
            chunk.map(|StreamChunk { delta, is_final, .. }| (delta, is_final))
        });
        Ok(Box::pin(mapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use courseforge_provider::LlmResponse;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that plays back a scripted list of outcomes.
    struct ScriptedProvider {
        responses: Vec<Result<String, String>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self
                .responses
                .get(index.min(self.responses.len().saturating_sub(1)))
                .cloned()
                .unwrap_or(Err("script exhausted".to_string()));
            match scripted {
                Ok(text) => Ok(LlmResponse {
                    text,
                    input_tokens: None,
                    output_tokens: None,
                    stop_reason: Some("end_turn".into()),
                }),
                Err(message) => Err(anyhow::anyhow!(message)),
            }
        }
    }

    fn standard(provider: Arc<ScriptedProvider>) -> StandardAgent {
        StandardAgent::new(
            "test-app",
            provider,
            SessionService::new(),
            "test-model",
            "You answer. Query: {query}",
        )
        .with_retry(1, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn standard_agent_returns_first_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("answer".into())]));
        let agent = standard(provider.clone());
        let result = agent
            .run("user-1", &CourseState::default(), "question")
            .await
            .unwrap();
        assert_eq!(result, "answer");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn standard_agent_retries_transport_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err("connection reset".into()),
            Ok("recovered".into()),
        ]));
        let agent = standard(provider.clone());
        let result = agent
            .run("user-1", &CourseState::default(), "question")
            .await
            .unwrap();
        assert_eq!(result, "recovered");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn standard_agent_retries_empty_responses_then_exhausts() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("  ".into()), Ok("".into())]));
        let agent = standard(provider.clone());
        let err = agent
            .run("user-1", &CourseState::default(), "question")
            .await
            .unwrap_err();
        let AgentError::Exhausted {
            attempts,
            last_error,
        } = err;
        assert_eq!(attempts, 2);
        assert!(last_error.contains("did not give a final response"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn response_hook_transforms_output() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("see https://img.example.com/a.png here".into())]));
        let agent = standard(provider).with_response_hook(crate::image::enforce_image_url);
        let result = agent
            .run("user-1", &CourseState::default(), "picture please")
            .await
            .unwrap();
        assert_eq!(result, "https://img.example.com/a.png");
    }

    #[derive(Debug, Deserialize)]
    struct Info {
        title: String,
        description: String,
    }

    fn structured(provider: Arc<ScriptedProvider>) -> StructuredAgent<Info> {
        StructuredAgent::new(
            "test-app",
            provider,
            SessionService::new(),
            "test-model",
            "Return JSON.",
        )
        .with_retry(1, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn structured_agent_parses_json_payload() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"title": "Rust", "description": "A course"}"#.into(),
        )]));
        let agent = structured(provider);
        let info = agent
            .run("user-1", &CourseState::default(), "info please")
            .await
            .unwrap();
        assert_eq!(info.title, "Rust");
        assert_eq!(info.description, "A course");
    }

    #[tokio::test]
    async fn structured_agent_strips_code_fences() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            "```json\n{\"title\": \"T\", \"description\": \"D\"}\n```".into(),
        )]));
        let agent = structured(provider);
        let info = agent
            .run("user-1", &CourseState::default(), "info")
            .await
            .unwrap();
        assert_eq!(info.title, "T");
    }

    #[tokio::test]
    async fn structured_agent_treats_parse_failure_as_transient() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("not json at all".into()),
            Ok(r#"{"title": "T", "description": "D"}"#.into()),
        ]));
        let agent = structured(provider.clone());
        let info = agent
            .run("user-1", &CourseState::default(), "info")
            .await
            .unwrap();
        assert_eq!(info.title, "T");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn structured_agent_exhausts_on_persistent_garbage() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("garbage".into())]));
        let agent = structured(provider.clone());
        let err = agent
            .run("user-1", &CourseState::default(), "info")
            .await
            .unwrap_err();
        let AgentError::Exhausted { last_error, .. } = err;
        assert!(last_error.contains("error parsing JSON response"));
        assert_eq!(provider.call_count(), 2);
    }

    #[test]
    fn render_instruction_substitutes_state_fields() {
        let state = CourseState {
            query: "learn rust".into(),
            chapters_str: "Caption: Intro".into(),
            ..Default::default()
        };
        let rendered = render_instruction(
            "Query: {query}\nPlan:\n{chapters_str}\nDifficulty: {difficulty}",
            &state.snapshot(),
        );
        assert!(rendered.contains("Query: learn rust"));
        assert!(rendered.contains("Caption: Intro"));
        assert!(rendered.contains("Difficulty: Intermediate"));
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn chat_agent_streams_chunks_in_order() {
        let agent = ChatAgent::new(
            "test-app",
            Arc::new(courseforge_provider::StubProvider),
            SessionService::new(),
            "test-model",
            "Chat about: {chapter_content}",
        );
        let mut stream = agent
            .stream(
                "user-1",
                1,
                serde_json::json!({"chapter_content": "loops"}),
                vec![],
                "tell me about loops",
            )
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item.unwrap());
        }
        assert!(chunks.len() > 1);
        assert!(chunks.iter().rev().skip(1).all(|(_, is_final)| !is_final));
        assert!(chunks.last().unwrap().1);
    }
}
