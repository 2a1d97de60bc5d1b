use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use courseforge_schema::ChapterPlan;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-(user, course) working set fed into every agent call. This is what an
/// agent knows about the course beyond its own prompt; sessions stay opaque
/// and short-lived, the working set carries the cross-call knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseState {
    pub query: String,
    pub time_hours: u32,
    pub language: String,
    pub difficulty: String,
    pub chapters: Vec<ChapterPlan>,
    /// Denormalized chapter overview shown to the explainer so it knows the
    /// full plan without the bookkeeping fields.
    pub chapters_str: String,
    pub code: String,
    pub errors: String,
}

impl Default for CourseState {
    fn default() -> Self {
        Self {
            query: String::new(),
            time_hours: 0,
            language: "English".to_string(),
            difficulty: "Intermediate".to_string(),
            chapters: Vec::new(),
            chapters_str: String::new(),
            code: String::new(),
            errors: String::new(),
        }
    }
}

impl CourseState {
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Process-local state registry. Mutations are serialized by the inner lock
/// and none of the operations suspend; callers clone the state out and never
/// hold a reference across an await.
#[derive(Clone, Default)]
pub struct StateService {
    states: Arc<Mutex<HashMap<(String, i64), CourseState>>>,
}

impl StateService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_state(&self, user_id: &str, course_id: i64, state: CourseState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((user_id.to_owned(), course_id), state);
    }

    /// Clone of the current state, or the default when nothing was created.
    pub fn get_state(&self, user_id: &str, course_id: i64) -> CourseState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(user_id.to_owned(), course_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Appends freshly planned chapters to both the structured list and the
    /// denormalized overview string.
    pub fn save_chapters(&self, user_id: &str, course_id: i64, chapters: &[ChapterPlan]) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states
            .entry((user_id.to_owned(), course_id))
            .or_default();
        for chapter in chapters {
            let bullets = serde_json::to_string_pretty(&chapter.content)
                .unwrap_or_else(|_| "[]".to_string());
            state.chapters_str.push_str(&format!(
                "\nCaption: {}\nContent Summary:\n{}\n",
                chapter.caption, bullets
            ));
        }
        state.chapters.extend(chapters.iter().cloned());
    }

    pub fn update_state<F>(&self, user_id: &str, course_id: i64, f: F)
    where
        F: FnOnce(&mut CourseState),
    {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states
            .entry((user_id.to_owned(), course_id))
            .or_default();
        f(state);
    }

    pub fn remove_state(&self, user_id: &str, course_id: i64) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(user_id.to_owned(), course_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(caption: &str) -> ChapterPlan {
        ChapterPlan {
            caption: caption.to_owned(),
            content: vec!["point one".into(), "point two".into()],
            time: 30,
            note: None,
        }
    }

    #[test]
    fn missing_state_falls_back_to_default() {
        let service = StateService::new();
        let state = service.get_state("nobody", 1);
        assert_eq!(state.language, "English");
        assert_eq!(state.difficulty, "Intermediate");
        assert!(state.chapters.is_empty());
    }

    #[test]
    fn save_chapters_appends_to_list_and_string() {
        let service = StateService::new();
        service.create_state(
            "user-1",
            1,
            CourseState {
                query: "learn rust".into(),
                time_hours: 4,
                ..Default::default()
            },
        );

        service.save_chapters("user-1", 1, &[plan("Intro"), plan("Ownership")]);
        service.save_chapters("user-1", 1, &[plan("Traits")]);

        let state = service.get_state("user-1", 1);
        assert_eq!(state.chapters.len(), 3);
        assert!(state.chapters_str.contains("Caption: Intro"));
        assert!(state.chapters_str.contains("Caption: Traits"));
        assert!(state.chapters_str.contains("point one"));
        assert_eq!(state.query, "learn rust");
    }

    #[test]
    fn states_are_isolated_per_user_and_course() {
        let service = StateService::new();
        service.create_state(
            "user-1",
            1,
            CourseState {
                query: "first".into(),
                ..Default::default()
            },
        );
        service.create_state(
            "user-1",
            2,
            CourseState {
                query: "second".into(),
                ..Default::default()
            },
        );

        assert_eq!(service.get_state("user-1", 1).query, "first");
        assert_eq!(service.get_state("user-1", 2).query, "second");
        assert_eq!(service.get_state("user-2", 1).query, "");
    }

    #[test]
    fn update_state_mutates_in_place() {
        let service = StateService::new();
        service.update_state("user-1", 1, |state| {
            state.code = "() => { return null; }".into();
            state.errors = "none".into();
        });
        let state = service.get_state("user-1", 1);
        assert_eq!(state.code, "() => { return null; }");
        assert_eq!(state.errors, "none");
    }

    #[test]
    fn snapshot_serializes_the_whole_state() {
        let state = CourseState {
            query: "q".into(),
            time_hours: 2,
            ..Default::default()
        };
        let snapshot = state.snapshot();
        assert_eq!(snapshot["query"], "q");
        assert_eq!(snapshot["time_hours"], 2);
        assert_eq!(snapshot["language"], "English");
    }
}
