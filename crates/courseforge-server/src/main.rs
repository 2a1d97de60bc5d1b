use std::sync::Arc;

use anyhow::Result;
use courseforge_agent::{EslintValidator, SessionService, StateService};
use courseforge_config::Config;
use courseforge_memory::{
    EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider, RetrievalService, VectorIndex,
};
use courseforge_pipeline::{AgentSuite, Orchestrator};
use courseforge_provider::provider_from_config;
use courseforge_server::state::AppState;
use courseforge_store::Store;
use courseforge_tasks::{spawn_stuck_course_sweep, TaskRegistry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::global();
    if config.llm.api_key.is_none() {
        tracing::warn!("LLM_API_KEY not set - course generation will fail at the first agent call");
    }

    // Startup database failure is the one fatal error; everything later
    // degrades instead of aborting.
    let store = Store::open(&config.database_path)?;

    let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding.endpoint {
        Some(endpoint) => Arc::new(HttpEmbeddingProvider::new(
            endpoint.clone(),
            config.embedding.api_key.clone(),
            config.embedding.model.clone(),
            config.embedding.dimensions,
        )),
        None => {
            tracing::warn!("EMBEDDING_ENDPOINT not set - using the deterministic hash embedder");
            Arc::new(HashEmbeddingProvider::new(config.embedding.dimensions))
        }
    };
    let vector_path = format!("{}.vectors", config.database_path);
    let index = VectorIndex::open(&vector_path, embedder)?;
    let retrieval = RetrievalService::new(index, config.collection_prefix.clone());

    let provider = provider_from_config(&config.llm);
    let sessions = SessionService::new();
    let agents = AgentSuite::from_config(config, provider, sessions.clone());
    let validator = Arc::new(EslintValidator::new(config.lint_command.clone()));
    let tasks = TaskRegistry::new();

    let orchestrator = Orchestrator::new(
        store.clone(),
        retrieval,
        StateService::new(),
        sessions,
        tasks.clone(),
        validator,
        agents,
        config,
    );

    let _sweep = spawn_stuck_course_sweep(store.clone());

    let state = AppState {
        store,
        orchestrator,
        tasks,
        config,
    };
    courseforge_server::serve(state, &config.bind_addr).await
}
