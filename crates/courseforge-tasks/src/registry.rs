use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use courseforge_schema::{CourseRequest, TaskStatus, TaskView};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Activity entries kept per task; older entries are discarded.
const ACTIVITY_LOG_CAP: usize = 20;

struct TaskEntry {
    course_id: i64,
    user_id: String,
    config: CourseRequest,
    status: TaskStatus,
    progress: u8,
    step: String,
    activity: VecDeque<String>,
    error: Option<String>,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskEntry {
    fn view(&self, task_id: &str) -> TaskView {
        TaskView {
            task_id: task_id.to_owned(),
            course_id: self.course_id,
            user_id: self.user_id.clone(),
            status: self.status,
            progress: self.progress,
            step: self.step.clone(),
            activity: self.activity.iter().cloned().collect(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn push_activity(&mut self, entry: String) {
        if self.activity.len() == ACTIVITY_LOG_CAP {
            self.activity.pop_front();
        }
        self.activity.push_back(entry);
    }
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, user_id: &str, course_id: i64, config: CourseRequest) -> String {
        let task_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let entry = TaskEntry {
            course_id,
            user_id: user_id.to_owned(),
            config,
            status: TaskStatus::Pending,
            progress: 0,
            step: "queued".to_owned(),
            activity: VecDeque::new(),
            error: None,
            cancel: CancellationToken::new(),
            created_at: now,
            updated_at: now,
        };
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.clone(), entry);
        task_id
    }

    pub fn update(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: u8,
        step: &str,
        details: Option<&str>,
        error: Option<&str>,
    ) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = tasks.get_mut(task_id) else {
            tracing::warn!("update for unknown task {task_id}");
            return;
        };
        entry.status = status;
        entry.progress = progress.min(100);
        entry.step = step.to_owned();
        entry.updated_at = Utc::now();
        if let Some(error) = error {
            entry.error = Some(error.to_owned());
        }
        let line = match details {
            Some(details) => format!("[{}%] {step}: {details}", entry.progress),
            None => format!("[{}%] {step}", entry.progress),
        };
        entry.push_activity(line);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskView> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .map(|entry| entry.view(task_id))
    }

    pub fn list_by_user(&self, user_id: &str) -> Vec<TaskView> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut views: Vec<TaskView> = tasks
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .map(|(id, entry)| entry.view(id))
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    /// Token the running pipeline polls at its suspension points.
    pub fn cancellation_token(&self, task_id: &str) -> Option<CancellationToken> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .map(|entry| entry.cancel.clone())
    }

    /// Signals cooperative cancellation. The running task observes the token
    /// at its next suspension point and marks itself cancelled; tasks that
    /// already reached a terminal status are left alone.
    pub fn cancel(&self, task_id: &str) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.get(task_id) {
            Some(entry) if !entry.status.is_terminal() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Re-arms a failed task for another run: returns the original config and
    /// binding, resets the entry to pending with a fresh token. Tasks in any
    /// other status are not retryable.
    pub fn retry(&self, task_id: &str) -> Option<(String, i64, CourseRequest)> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let entry = tasks.get_mut(task_id)?;
        if entry.status != TaskStatus::Failed {
            return None;
        }
        entry.status = TaskStatus::Pending;
        entry.progress = 0;
        entry.step = "queued".to_owned();
        entry.error = None;
        entry.cancel = CancellationToken::new();
        entry.updated_at = Utc::now();
        entry.push_activity("[0%] queued: retry".to_owned());
        Some((entry.user_id.clone(), entry.course_id, entry.config.clone()))
    }
}
