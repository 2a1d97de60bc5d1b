use std::time::Duration;

use anyhow::Result;
use courseforge_store::Store;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// How long a course may sit in `creating` before it is considered stuck.
pub const STUCK_COURSE_MAX_AGE: chrono::Duration = chrono::Duration::hours(2);

/// One sweep pass: any course still `creating` past the age limit is marked
/// failed with a timeout message.
pub async fn sweep_once(store: &Store) -> Result<usize> {
    store.fail_stuck_courses(STUCK_COURSE_MAX_AGE).await
}

/// Spawns the hourly sweep. Errors are logged and the loop keeps running;
/// the service never goes down because the sweep had a bad hour.
pub fn spawn_stuck_course_sweep(store: Store) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            match sweep_once(&store).await {
                Ok(0) => {}
                Ok(count) => tracing::info!("marked {count} stuck courses as failed"),
                Err(e) => tracing::error!("stuck-course sweep failed: {e}"),
            }
        }
    })
}
