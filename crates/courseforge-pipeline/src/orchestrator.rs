use std::sync::Arc;

use anyhow::{anyhow, Result};
use courseforge_agent::{
    code_review_loop, is_component_source, queries, repair_question_source, CourseState,
    SessionService, StateService, SyntaxValidator, FALLBACK_IMAGE_URL,
};
use courseforge_config::Config;
use courseforge_memory::{DocumentSource, RetrievalService};
use courseforge_schema::{
    ChapterPlan, CourseRequest, CourseStatus, GeneratedQuestion, GradeResult, TaskStatus,
    UsageAction,
};
use courseforge_store::{CourseUpdate, NewChapter, Store, StoredFile};
use courseforge_tasks::TaskRegistry;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentSuite, APP_NAME};

/// Persisted when the explainer cannot produce valid source within its
/// review budget.
const FALLBACK_COMPONENT: &str = "() => { return <p>Something went wrong.</p>; }";

enum RunOutcome {
    Finished,
    Cancelled,
}

/// Drives one course from CREATING to FINISHED or FAILED. The orchestrator
/// exclusively owns course mutations while its task runs; everything else
/// only reads the row until a terminal status lands.
#[derive(Clone)]
pub struct Orchestrator {
    store: Store,
    retrieval: RetrievalService,
    state: StateService,
    sessions: SessionService,
    tasks: TaskRegistry,
    validator: Arc<dyn SyntaxValidator>,
    agents: AgentSuite,
    chapter_limit: Arc<Semaphore>,
    question_limit: Arc<Semaphore>,
    explainer_iterations: u32,
    tester_iterations: u32,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        retrieval: RetrievalService,
        state: StateService,
        sessions: SessionService,
        tasks: TaskRegistry,
        validator: Arc<dyn SyntaxValidator>,
        agents: AgentSuite,
        config: &Config,
    ) -> Self {
        Self {
            store,
            retrieval,
            state,
            sessions,
            tasks,
            validator,
            agents,
            chapter_limit: Arc::new(Semaphore::new(config.chapter_concurrency.max(1))),
            question_limit: Arc::new(Semaphore::new(config.question_concurrency.max(1))),
            explainer_iterations: config.explainer_review_iterations.max(1),
            tester_iterations: config.tester_review_iterations.max(1),
        }
    }

    pub fn agents(&self) -> &AgentSuite {
        &self.agents
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Entry point for the background worker. Never returns an error: the
    /// outcome lands on the course row and the task registry.
    pub async fn run(&self, user_id: String, course_id: i64, request: CourseRequest, task_id: String) {
        let token = self
            .tasks
            .cancellation_token(&task_id)
            .unwrap_or_default();

        match self
            .generate(&user_id, course_id, &request, &task_id, &token)
            .await
        {
            Ok(RunOutcome::Finished) => {
                self.tasks
                    .update(&task_id, TaskStatus::Completed, 100, "finished", None, None);
                tracing::info!("course {course_id} finished for user {user_id}");
            }
            Ok(RunOutcome::Cancelled) => {
                // The course row stays in `creating`; the hourly sweep will
                // eventually time it out.
                let progress = self.current_progress(&task_id);
                self.tasks.update(
                    &task_id,
                    TaskStatus::Cancelled,
                    progress,
                    "cancelled",
                    None,
                    None,
                );
                tracing::info!("course {course_id} generation cancelled");
            }
            Err(e) => {
                let error_message = format!("Course creation failed: {e:#}");
                tracing::error!("course {course_id}: {error_message}");
                if let Err(db_err) = self
                    .store
                    .update_course_status(course_id, CourseStatus::Failed)
                    .await
                {
                    tracing::error!("failed to mark course {course_id} failed: {db_err}");
                }
                if let Err(db_err) = self
                    .store
                    .update_course(
                        course_id,
                        CourseUpdate {
                            error_msg: Some(error_message.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    tracing::error!("failed to store error for course {course_id}: {db_err}");
                }
                let progress = self.current_progress(&task_id);
                self.tasks.update(
                    &task_id,
                    TaskStatus::Failed,
                    progress,
                    "failed",
                    None,
                    Some(&error_message),
                );
            }
        }
    }

    fn current_progress(&self, task_id: &str) -> u8 {
        self.tasks.get(task_id).map(|t| t.progress).unwrap_or(0)
    }

    async fn generate(
        &self,
        user_id: &str,
        course_id: i64,
        request: &CourseRequest,
        task_id: &str,
        token: &CancellationToken,
    ) -> Result<RunOutcome> {
        macro_rules! bail_if_cancelled {
            () => {
                if token.is_cancelled() {
                    return Ok(RunOutcome::Cancelled);
                }
            };
        }

        // Logged before any costly work so the quota gate sees the attempt
        // even if generation dies early.
        self.store
            .log_usage(
                user_id,
                UsageAction::CreateCourse,
                Some(course_id),
                None,
                Some(serde_json::to_string(request)?),
            )
            .await?;
        self.tasks.update(
            task_id,
            TaskStatus::Analyzing,
            5,
            "course creation started",
            None,
            None,
        );

        let session = self
            .sessions
            .create(APP_NAME, user_id, serde_json::Value::Null);

        bail_if_cancelled!();
        let docs = self
            .store
            .documents_by_ids(user_id, &request.document_ids)
            .await?;
        let images = self
            .store
            .images_by_ids(user_id, &request.picture_ids)
            .await?;
        tracing::info!(
            "course {course_id}: loaded {} documents and {} images",
            docs.len(),
            images.len()
        );

        self.tasks.update(
            task_id,
            TaskStatus::Extracting,
            15,
            "indexing documents",
            None,
            None,
        );
        let sources: Vec<DocumentSource> = docs
            .iter()
            .map(|doc| DocumentSource {
                id: doc.id,
                filename: doc.filename.clone(),
                content_type: doc.content_type.clone(),
                data: doc.data.clone(),
            })
            .collect();
        bail_if_cancelled!();
        // Missing retrieval context is not fatal; the explainer simply gets
        // less to work with.
        if let Err(e) = self.retrieval.ingest_documents(course_id, &sources).await {
            tracing::warn!("course {course_id}: document ingest failed: {e}");
        }
        bail_if_cancelled!();

        self.tasks.update(
            task_id,
            TaskStatus::Analyzing,
            25,
            "deriving course info",
            None,
            None,
        );
        let previews = document_previews(&docs);
        let image_names: Vec<String> = images.iter().map(|img| img.filename.clone()).collect();
        let info = self
            .agents
            .info
            .run(
                user_id,
                &CourseState::default(),
                &queries::info_query(request, &previews, &image_names),
            )
            .await?;
        bail_if_cancelled!();

        let image_url = self
            .agents
            .image
            .run(
                user_id,
                &CourseState::default(),
                &queries::course_image_query(&info.title, &info.description),
            )
            .await?;
        bail_if_cancelled!();

        self.store
            .update_course(
                course_id,
                CourseUpdate {
                    session_id: Some(session.id.clone()),
                    title: Some(info.title.clone()),
                    description: Some(info.description.clone()),
                    image_url: Some(image_url),
                    total_time_hours: Some(request.time_hours as i64),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| anyhow!("course {course_id} disappeared during generation"))?;

        self.state.create_state(
            user_id,
            course_id,
            CourseState {
                query: request.query.clone(),
                time_hours: request.time_hours,
                language: request.language.clone(),
                difficulty: request.difficulty.clone(),
                ..Default::default()
            },
        );

        for doc in &docs {
            self.store.bind_document_to_course(doc.id, course_id).await?;
        }
        for img in &images {
            self.store.bind_image_to_course(img.id, course_id).await?;
        }

        self.tasks.update(
            task_id,
            TaskStatus::Generating,
            30,
            "planning chapters",
            None,
            None,
        );
        bail_if_cancelled!();
        let path = self
            .agents
            .planner
            .run(
                user_id,
                &self.state.get_state(user_id, course_id),
                &queries::planner_query(request),
            )
            .await?;
        if path.chapters.is_empty() {
            anyhow::bail!("planner returned no chapters");
        }
        let chapter_count = path.chapters.len();

        self.store
            .update_course(
                course_id,
                CourseUpdate {
                    chapter_count: Some(chapter_count as i64),
                    ..Default::default()
                },
            )
            .await?;
        self.state.save_chapters(user_id, course_id, &path.chapters);
        bail_if_cancelled!();

        self.tasks.update(
            task_id,
            TaskStatus::Generating,
            40,
            &format!("generating {chapter_count} chapters"),
            None,
            None,
        );

        let mut chapter_tasks: JoinSet<Result<()>> = JoinSet::new();
        for (idx, plan) in path.chapters.into_iter().enumerate() {
            let this = self.clone();
            let user = user_id.to_owned();
            let token = token.clone();
            chapter_tasks.spawn(async move {
                let _permit = this.chapter_limit.clone().acquire_owned().await?;
                if token.is_cancelled() {
                    return Ok(());
                }
                this.process_chapter(&user, course_id, idx, &plan, &token)
                    .await
            });
        }
        while let Some(joined) = chapter_tasks.join_next().await {
            joined.map_err(|e| anyhow!("chapter task panicked: {e}"))??;
        }
        bail_if_cancelled!();

        self.tasks.update(
            task_id,
            TaskStatus::Packaging,
            95,
            "finalizing course",
            None,
            None,
        );
        self.store
            .update_course_status(course_id, CourseStatus::Finished)
            .await?;

        Ok(RunOutcome::Finished)
    }

    /// One chapter: retrieval context, explainer through the review loop in
    /// parallel with the chapter illustration, chapter row first, questions
    /// second.
    async fn process_chapter(
        &self,
        user_id: &str,
        course_id: i64,
        idx: usize,
        plan: &ChapterPlan,
        token: &CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            "course {course_id}: processing chapter {} ({})",
            idx + 1,
            plan.caption
        );

        let rag_context = match self.retrieval.rag_for_chapter(course_id, plan).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!("course {course_id}: retrieval failed for chapter {}: {e}", idx + 1);
                Vec::new()
            }
        };

        let state = self.state.get_state(user_id, course_id);
        let explainer_prompt =
            queries::explainer_query(idx, plan, &state.language, &state.difficulty, &rag_context);

        if token.is_cancelled() {
            return Ok(());
        }

        let default_course_state = CourseState::default();
        let chapter_image_query = queries::chapter_image_query(plan);
        let (source, image_url) = tokio::join!(
            code_review_loop(
                &self.agents.explainer,
                self.validator.as_ref(),
                user_id,
                &state,
                &explainer_prompt,
                self.explainer_iterations,
            ),
            self.agents.image.run(
                user_id,
                &default_course_state,
                &chapter_image_query,
            ),
        );

        if token.is_cancelled() {
            return Ok(());
        }

        let content = match source? {
            Some(source) => source,
            None => {
                tracing::warn!(
                    "course {course_id}: explainer never produced valid source for chapter {}",
                    idx + 1
                );
                FALLBACK_COMPONENT.to_string()
            }
        };
        let image_url = image_url.unwrap_or_else(|e| {
            tracing::warn!("course {course_id}: chapter image failed: {e}");
            FALLBACK_IMAGE_URL.to_string()
        });

        let summary = plan
            .content
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let chapter = self
            .store
            .create_chapter(NewChapter {
                course_id,
                idx: (idx + 1) as i64,
                caption: plan.caption.clone(),
                summary: Some(summary),
                content: content.clone(),
                time_minutes: plan.time as i64,
                image_url: Some(image_url),
            })
            .await?;

        if token.is_cancelled() {
            return Ok(());
        }

        let question_set = self
            .agents
            .tester
            .run(
                user_id,
                &state,
                &queries::tester_query(plan, &content, &state.language, &state.difficulty),
            )
            .await?;
        let surviving = self
            .repair_questions(user_id, &state, question_set.questions)
            .await?;

        for question in &surviving {
            self.store.insert_question(chapter.id, question).await?;
        }
        tracing::info!(
            "course {course_id}: chapter {} stored with {} questions",
            idx + 1,
            surviving.len()
        );
        Ok(())
    }

    /// Per-question repair, fanned out under the question semaphore.
    /// Questions with plain-text payloads pass straight through; questions
    /// whose source cannot be repaired are dropped, never persisted
    /// malformed.
    async fn repair_questions(
        &self,
        user_id: &str,
        state: &CourseState,
        questions: Vec<GeneratedQuestion>,
    ) -> Result<Vec<GeneratedQuestion>> {
        let mut surviving = Vec::new();
        let mut repair_tasks: JoinSet<Result<Option<GeneratedQuestion>>> = JoinSet::new();

        for mut question in questions {
            if !is_component_source(question.question()) {
                surviving.push(question);
                continue;
            }

            let this = self.clone();
            let user = user_id.to_owned();
            let state = state.clone();
            repair_tasks.spawn(async move {
                let _permit = this.question_limit.clone().acquire_owned().await?;
                let repaired = repair_question_source(
                    &this.agents.code_review,
                    this.validator.as_ref(),
                    &user,
                    &state,
                    question.question(),
                    this.tester_iterations,
                )
                .await?;
                Ok(repaired.map(|source| {
                    question.set_question(source);
                    question
                }))
            });
        }

        let mut dropped = 0;
        while let Some(joined) = repair_tasks.join_next().await {
            match joined.map_err(|e| anyhow!("question repair task panicked: {e}"))?? {
                Some(question) => surviving.push(question),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            tracing::warn!("dropped {dropped} unrepairable questions");
        }

        Ok(surviving)
    }

    /// Grading subpath, outside the pipeline but on the same runtime. The
    /// full payload lands in the ledger.
    pub async fn grade(
        &self,
        user_id: &str,
        course_id: i64,
        chapter_id: i64,
        question: &str,
        correct_answer: &str,
        users_answer: &str,
    ) -> Result<GradeResult> {
        let state = self.state.get_state(user_id, course_id);
        let result = self
            .agents
            .grader
            .run(
                user_id,
                &state,
                &queries::grader_query(question, correct_answer, users_answer),
            )
            .await?;

        let details = serde_json::json!({
            "course_id": course_id,
            "question": question,
            "correct_answer": correct_answer,
            "users_answer": users_answer,
            "points": result.points,
            "explanation": result.explanation,
        });
        self.store
            .log_usage(
                user_id,
                UsageAction::GradeQuestion,
                Some(course_id),
                Some(chapter_id),
                Some(details.to_string()),
            )
            .await?;

        Ok(result)
    }
}

/// Short text previews of uploaded documents for the info agent. PDFs
/// contribute their first extracted paragraph, plain-text formats their
/// first lines, everything else just the filename.
fn document_previews(docs: &[StoredFile]) -> Vec<String> {
    const PREVIEW_LIMIT: usize = 500;

    docs.iter()
        .map(|doc| {
            let body = if doc.content_type == "application/pdf" {
                courseforge_memory::extract_structured_content(&doc.data)
                    .ok()
                    .and_then(|content| content.paragraphs.into_iter().next())
                    .map(|paragraph| paragraph.text)
                    .unwrap_or_default()
            } else if doc.content_type.starts_with("text/")
                || doc.content_type == "application/json"
            {
                String::from_utf8_lossy(&doc.data)
                    .lines()
                    .take(10)
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                String::new()
            };
            let preview: String = body.chars().take(PREVIEW_LIMIT).collect();
            format!("{}:\n{preview}", doc.filename)
        })
        .collect()
}
