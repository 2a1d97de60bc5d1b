use courseforge_config::Config;
use courseforge_pipeline::Orchestrator;
use courseforge_store::Store;
use courseforge_tasks::TaskRegistry;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub orchestrator: Orchestrator,
    pub tasks: TaskRegistry,
    pub config: &'static Config,
}
