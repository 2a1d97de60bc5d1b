use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::models::User;
use crate::{now_sql, parse_datetime_sql, parse_optional_datetime_sql, Store};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
}

impl Store {
    pub async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let id = new_user.id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO users (id, username, email, hashed_password, is_active, is_admin, created_at, login_streak)
                VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, 0)
                "#,
                params![
                    new_user.id,
                    new_user.username,
                    new_user.email,
                    new_user.hashed_password,
                    new_user.is_admin,
                    now_sql(),
                ],
            )?;
            Ok(())
        })
        .await?;
        self.get_user(&id)
            .await?
            .ok_or_else(|| anyhow!("user vanished after insert"))
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    &format!("{SELECT_USER} WHERE id = ?1"),
                    params![user_id],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = username.to_owned();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    &format!("{SELECT_USER} WHERE username = ?1"),
                    params![username],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_owned();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    &format!("{SELECT_USER} WHERE email = ?1"),
                    params![email],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    /// Login accepts either the username or the email address.
    pub async fn get_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let login = login.to_owned();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    &format!("{SELECT_USER} WHERE username = ?1 OR email = ?1"),
                    params![login],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    pub async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_USER} ORDER BY created_at LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit, offset], row_to_user)?;
            let mut users = Vec::new();
            for row in rows {
                users.push(row?);
            }
            Ok(users)
        })
        .await
    }

    pub async fn update_user(&self, user_id: &str, update: UserUpdate) -> Result<Option<User>> {
        let id = user_id.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                UPDATE users SET
                    username = COALESCE(?2, username),
                    email = COALESCE(?3, email),
                    is_active = COALESCE(?4, is_active),
                    is_admin = COALESCE(?5, is_admin)
                WHERE id = ?1
                "#,
                params![id, update.username, update.email, update.is_active, update.is_admin],
            )?;
            Ok(())
        })
        .await?;
        self.get_user(user_id).await
    }

    pub async fn change_password(&self, user_id: &str, hashed_password: String) -> Result<bool> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET hashed_password = ?2 WHERE id = ?1",
                params![user_id, hashed_password],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Updates last_login and the login streak. On login day D: previous
    /// last-login day = D-1 increments the streak, = D leaves it unchanged,
    /// anything else (including the first login) resets it to 1.
    pub async fn record_login(&self, user_id: &str) -> Result<Option<User>> {
        let id = user_id.to_owned();
        self.with_conn(move |conn| {
            let row: Option<(Option<String>, i64)> = conn
                .query_row(
                    "SELECT last_login, login_streak FROM users WHERE id = ?1",
                    params![id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            let Some((last_login_raw, streak)) = row else {
                return Ok(());
            };

            let now = Utc::now();
            let last_login = parse_optional_datetime_sql(last_login_raw)?;
            let new_streak = match last_login {
                None => 1,
                Some(previous) => {
                    let gap = now
                        .date_naive()
                        .signed_duration_since(previous.date_naive())
                        .num_days();
                    match gap {
                        0 => streak,
                        1 => streak + 1,
                        _ => 1,
                    }
                }
            };

            conn.execute(
                "UPDATE users SET last_login = ?2, login_streak = ?3 WHERE id = ?1",
                params![id, now.to_rfc3339(), new_streak],
            )?;
            Ok(())
        })
        .await?;
        self.get_user(user_id).await
    }

    /// Administrative deletion: removes everything the user owns in one
    /// transaction, then the user row itself. Ordered so no foreign key is
    /// ever dangling: notes, images of owned courses, questions of owned
    /// chapters, documents of owned courses, chapters, courses, unbound
    /// documents and images, user.
    pub async fn delete_user_cascade(&self, user_id: &str) -> Result<bool> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;

            tx.execute("DELETE FROM notes WHERE user_id = ?1", params![user_id])?;
            tx.execute(
                "DELETE FROM images WHERE course_id IN (SELECT id FROM courses WHERE user_id = ?1)",
                params![user_id],
            )?;
            tx.execute(
                r#"
                DELETE FROM practice_questions WHERE chapter_id IN (
                    SELECT id FROM chapters WHERE course_id IN (
                        SELECT id FROM courses WHERE user_id = ?1
                    )
                )
                "#,
                params![user_id],
            )?;
            tx.execute(
                "DELETE FROM documents WHERE course_id IN (SELECT id FROM courses WHERE user_id = ?1)",
                params![user_id],
            )?;
            tx.execute(
                "DELETE FROM notes WHERE chapter_id IN (SELECT id FROM chapters WHERE course_id IN (SELECT id FROM courses WHERE user_id = ?1))",
                params![user_id],
            )?;
            tx.execute(
                "DELETE FROM chat_messages WHERE course_id IN (SELECT id FROM courses WHERE user_id = ?1)",
                params![user_id],
            )?;
            tx.execute(
                "DELETE FROM chapters WHERE course_id IN (SELECT id FROM courses WHERE user_id = ?1)",
                params![user_id],
            )?;
            tx.execute("DELETE FROM courses WHERE user_id = ?1", params![user_id])?;
            tx.execute(
                "DELETE FROM documents WHERE user_id = ?1 AND course_id IS NULL",
                params![user_id],
            )?;
            tx.execute("DELETE FROM images WHERE user_id = ?1", params![user_id])?;
            let deleted = tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;

            tx.commit()?;
            Ok(deleted > 0)
        })
        .await
    }
}

const SELECT_USER: &str = r#"
SELECT id, username, email, hashed_password, is_active, is_admin, created_at, last_login, login_streak
FROM users
"#;

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let created_at_raw: String = row.get(6)?;
    let last_login_raw: Option<String> = row.get(7)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        hashed_password: row.get(3)?,
        is_active: row.get(4)?,
        is_admin: row.get(5)?,
        created_at: parse_datetime_sql(&created_at_raw)?,
        last_login: parse_optional_datetime_sql(last_login_raw)?,
        login_streak: row.get(8)?,
    })
}
