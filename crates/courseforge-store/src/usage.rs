use anyhow::Result;
use courseforge_schema::UsageAction;
use rusqlite::{params, Row};

use crate::models::UsageEvent;
use crate::{now_sql, parse_datetime_sql, Store};

impl Store {
    /// Appends one ledger row. The ledger is append-only; nothing updates or
    /// deletes rows once written.
    pub async fn log_usage(
        &self,
        user_id: &str,
        action: UsageAction,
        course_id: Option<i64>,
        chapter_id: Option<i64>,
        details: Option<String>,
    ) -> Result<UsageEvent> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO usage_events (user_id, course_id, chapter_id, action, details, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![user_id, course_id, chapter_id, action.as_str(), details, now_sql()],
            )?;
            let id = conn.last_insert_rowid();
            let event = conn.query_row(
                &format!("{SELECT_EVENT} WHERE id = ?1"),
                params![id],
                row_to_event,
            )?;
            Ok(event)
        })
        .await
    }

    pub async fn count_actions(&self, user_id: &str, action: UsageAction) -> Result<i64> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM usage_events WHERE user_id = ?1 AND action = ?2",
                params![user_id, action.as_str()],
                |r| r.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    pub async fn count_created_courses(&self, user_id: &str) -> Result<i64> {
        self.count_actions(user_id, UsageAction::CreateCourse).await
    }

    pub async fn count_chat(&self, user_id: &str) -> Result<i64> {
        self.count_actions(user_id, UsageAction::Chat).await
    }

    pub async fn login_count(&self, user_id: &str) -> Result<i64> {
        self.count_actions(user_id, UsageAction::Login).await
    }

    /// Coarse learn-time estimate: ten minutes per visibility ping that was
    /// tied to a concrete chapter. Deliberately avoids open/close pairing.
    pub async fn total_learn_time_minutes(&self, user_id: &str) -> Result<i64> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                r#"
                SELECT COUNT(*) FROM usage_events
                WHERE user_id = ?1 AND action = 'site_visible'
                  AND course_id IS NOT NULL AND chapter_id IS NOT NULL
                "#,
                params![user_id],
                |r| r.get(0),
            )?;
            Ok(count * 10)
        })
        .await
    }

    pub async fn list_usage(&self, user_id: &str, limit: i64) -> Result<Vec<UsageEvent>> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_EVENT} WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![user_id, limit], row_to_event)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
        .await
    }
}

const SELECT_EVENT: &str = r#"
SELECT id, user_id, course_id, chapter_id, action, details, created_at
FROM usage_events
"#;

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<UsageEvent> {
    let created_at_raw: String = row.get(6)?;
    Ok(UsageEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        course_id: row.get(2)?,
        chapter_id: row.get(3)?,
        action: row.get(4)?,
        details: row.get(5)?,
        created_at: parse_datetime_sql(&created_at_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;

    async fn store_with_user() -> (Store, String) {
        let store = Store::open_in_memory().unwrap();
        let user = store
            .create_user(NewUser {
                id: "user-1".into(),
                username: "owner".into(),
                email: "owner@example.com".into(),
                hashed_password: "hash".into(),
                is_admin: false,
            })
            .await
            .unwrap();
        (store, user.id)
    }

    #[tokio::test]
    async fn counting_filters_by_user_and_action() {
        let (store, user_id) = store_with_user().await;
        store
            .log_usage(&user_id, UsageAction::CreateCourse, Some(1), None, None)
            .await
            .unwrap();
        store
            .log_usage(&user_id, UsageAction::CreateCourse, Some(2), None, None)
            .await
            .unwrap();
        store
            .log_usage(&user_id, UsageAction::Chat, Some(1), Some(1), None)
            .await
            .unwrap();
        store
            .log_usage("someone-else", UsageAction::CreateCourse, Some(3), None, None)
            .await
            .unwrap();

        assert_eq!(store.count_created_courses(&user_id).await.unwrap(), 2);
        assert_eq!(store.count_chat(&user_id).await.unwrap(), 1);
        assert_eq!(store.login_count(&user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn learn_time_counts_only_chapter_scoped_visibility() {
        let (store, user_id) = store_with_user().await;
        // Counts: visible with both course and chapter.
        store
            .log_usage(&user_id, UsageAction::SiteVisible, Some(1), Some(2), None)
            .await
            .unwrap();
        store
            .log_usage(&user_id, UsageAction::SiteVisible, Some(1), Some(3), None)
            .await
            .unwrap();
        // Ignored: missing chapter, hidden event, other user.
        store
            .log_usage(&user_id, UsageAction::SiteVisible, Some(1), None, None)
            .await
            .unwrap();
        store
            .log_usage(&user_id, UsageAction::SiteHidden, Some(1), Some(2), None)
            .await
            .unwrap();
        store
            .log_usage("other", UsageAction::SiteVisible, Some(1), Some(2), None)
            .await
            .unwrap();

        assert_eq!(store.total_learn_time_minutes(&user_id).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn details_round_trip() {
        let (store, user_id) = store_with_user().await;
        let details = serde_json::json!({"query": "rust", "points": 2}).to_string();
        let event = store
            .log_usage(
                &user_id,
                UsageAction::GradeQuestion,
                Some(7),
                Some(9),
                Some(details.clone()),
            )
            .await
            .unwrap();
        assert_eq!(event.action, "grade_question");
        assert_eq!(event.details.as_deref(), Some(details.as_str()));
        assert_eq!(event.course_id, Some(7));

        let listed = store.list_usage(&user_id, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
