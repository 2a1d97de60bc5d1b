use anyhow::Result;
use rusqlite::{params, Row};

use crate::models::ChatMessage;
use crate::{now_sql, parse_datetime_sql, Store};

impl Store {
    pub async fn insert_chat_message(
        &self,
        course_id: i64,
        user_id: &str,
        role: &str,
        content: &str,
    ) -> Result<ChatMessage> {
        let user_id = user_id.to_owned();
        let role = role.to_owned();
        let content = content.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO chat_messages (course_id, user_id, role, content, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![course_id, user_id, role, content, now_sql()],
            )?;
            let id = conn.last_insert_rowid();
            let message = conn.query_row(
                &format!("{SELECT_MESSAGE} WHERE id = ?1"),
                params![id],
                row_to_message,
            )?;
            Ok(message)
        })
        .await
    }

    /// Most recent messages for one user's conversation on a course, oldest
    /// first so they can feed a prompt directly.
    pub async fn list_chat_messages(
        &self,
        course_id: i64,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE} WHERE course_id = ?1 AND user_id = ?2 ORDER BY id DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![course_id, user_id, limit], row_to_message)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            messages.reverse();
            Ok(messages)
        })
        .await
    }
}

const SELECT_MESSAGE: &str = r#"
SELECT id, course_id, user_id, role, content, created_at
FROM chat_messages
"#;

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let created_at_raw: String = row.get(5)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        course_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_datetime_sql(&created_at_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;

    #[tokio::test]
    async fn chat_history_comes_back_oldest_first() {
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
        let course = store
            .create_course(&user.id, "topic", 1, "English", "Easy")
            .await
            .unwrap();

        store
            .insert_chat_message(course.id, &user.id, "user", "hello")
            .await
            .unwrap();
        store
            .insert_chat_message(course.id, &user.id, "assistant", "hi there")
            .await
            .unwrap();
        store
            .insert_chat_message(course.id, &user.id, "user", "explain loops")
            .await
            .unwrap();

        let history = store.list_chat_messages(course.id, &user.id, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi there");
        assert_eq!(history[1].content, "explain loops");
    }
}
