use std::sync::Arc;
use std::time::Duration;

use courseforge_agent::queries::instructions;
use courseforge_agent::{
    ChatAgent, ImageAgent, SessionService, StandardAgent, StructuredAgent, UnsplashClient,
};
use courseforge_config::Config;
use courseforge_provider::LlmProvider;
use courseforge_schema::{CourseInfo, GradeResult, LearningPath, QuestionSet};

pub const APP_NAME: &str = "courseforge";

/// The full cast of pipeline agents, wired once at startup and cloned into
/// every course run.
#[derive(Clone)]
pub struct AgentSuite {
    pub info: StructuredAgent<CourseInfo>,
    pub planner: StructuredAgent<LearningPath>,
    pub explainer: StandardAgent,
    pub code_review: StandardAgent,
    pub tester: StructuredAgent<QuestionSet>,
    pub grader: StructuredAgent<GradeResult>,
    pub image: ImageAgent,
    pub chat: ChatAgent,
}

impl AgentSuite {
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn LlmProvider>,
        sessions: SessionService,
    ) -> Self {
        let retry_delay = Duration::from_secs(config.llm.retry_delay_secs);
        let retries = config.llm.max_retries;
        let fast = &config.llm.fast_model;

        let image_base = StandardAgent::new(
            APP_NAME,
            provider.clone(),
            sessions.clone(),
            fast.clone(),
            instructions::IMAGE,
        )
        .with_retry(retries, retry_delay);
        let search = config
            .image_search_key
            .as_ref()
            .map(|key| UnsplashClient::new(key.clone()));

        Self {
            info: StructuredAgent::new(
                APP_NAME,
                provider.clone(),
                sessions.clone(),
                fast.clone(),
                instructions::INFO,
            )
            .with_retry(retries, retry_delay),
            planner: StructuredAgent::new(
                APP_NAME,
                provider.clone(),
                sessions.clone(),
                fast.clone(),
                instructions::PLANNER,
            )
            .with_retry(retries, retry_delay),
            explainer: StandardAgent::new(
                APP_NAME,
                provider.clone(),
                sessions.clone(),
                config.llm.model.clone(),
                instructions::EXPLAINER,
            )
            .with_retry(retries, retry_delay),
            code_review: StandardAgent::new(
                APP_NAME,
                provider.clone(),
                sessions.clone(),
                fast.clone(),
                instructions::CODE_REVIEW,
            )
            .with_retry(retries, retry_delay),
            tester: StructuredAgent::new(
                APP_NAME,
                provider.clone(),
                sessions.clone(),
                fast.clone(),
                instructions::TESTER,
            )
            .with_retry(retries, retry_delay),
            grader: StructuredAgent::new(
                APP_NAME,
                provider.clone(),
                sessions.clone(),
                fast.clone(),
                instructions::GRADER,
            )
            .with_retry(retries, retry_delay),
            image: ImageAgent::new(image_base, search),
            chat: ChatAgent::new(
                APP_NAME,
                provider,
                sessions,
                fast.clone(),
                instructions::CHAT,
            ),
        }
    }
}
