use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Opaque handle scoping one sequence of agent events. Pipeline agents get a
/// fresh session per call to keep prompts bounded; the chat agent reuses one
/// session per `(app_name, user, chapter)` binding.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub state: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct SessionService {
    sessions: Arc<Mutex<HashMap<String, SessionRecord>>>,
    chat_bindings: Arc<Mutex<HashMap<String, String>>>,
}

impl SessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh session carrying the given state snapshot.
    pub fn create(&self, app_name: &str, user_id: &str, state: Value) -> SessionRecord {
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            app_name: app_name.to_owned(),
            user_id: user_id.to_owned(),
            state,
            created_at: Utc::now(),
        };
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record.clone());
        record
    }

    /// Resumes (or creates) the persistent chat session for a chapter.
    pub fn get_or_create_chat(
        &self,
        app_name: &str,
        user_id: &str,
        chapter_id: i64,
        state: Value,
    ) -> SessionRecord {
        let key = format!("{app_name}:{user_id}:{chapter_id}");
        let existing = self
            .chat_bindings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();

        if let Some(session_id) = existing {
            if let Some(record) = self.get(&session_id) {
                return record;
            }
        }

        let record = self.create(app_name, user_id, state);
        self.chat_bindings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, record.id.clone());
        record
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_returns_distinct_sessions() {
        let service = SessionService::new();
        let a = service.create("app", "user-1", Value::Null);
        let b = service.create("app", "user-1", Value::Null);
        assert_ne!(a.id, b.id);
        assert!(service.get(&a.id).is_some());
        assert!(service.get(&b.id).is_some());
    }

    #[test]
    fn chat_sessions_are_stable_per_chapter() {
        let service = SessionService::new();
        let first = service.get_or_create_chat("app", "user-1", 7, Value::Null);
        let again = service.get_or_create_chat("app", "user-1", 7, Value::Null);
        assert_eq!(first.id, again.id);

        let other_chapter = service.get_or_create_chat("app", "user-1", 8, Value::Null);
        assert_ne!(first.id, other_chapter.id);

        let other_user = service.get_or_create_chat("app", "user-2", 7, Value::Null);
        assert_ne!(first.id, other_user.id);
    }

    #[test]
    fn remove_forgets_the_session() {
        let service = SessionService::new();
        let record = service.create("app", "user-1", Value::Null);
        assert!(service.remove(&record.id));
        assert!(!service.remove(&record.id));
        assert!(service.get(&record.id).is_none());
    }
}
