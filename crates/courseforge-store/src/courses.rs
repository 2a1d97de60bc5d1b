use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use courseforge_schema::CourseStatus;
use rusqlite::{params, OptionalExtension, Row};

use crate::models::Course;
use crate::{now_sql, parse_datetime_sql, Store};

/// Partial update applied by the generation pipeline. `None` leaves the
/// column untouched.
#[derive(Debug, Clone, Default)]
pub struct CourseUpdate {
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub chapter_count: Option<i64>,
    pub total_time_hours: Option<i64>,
    pub error_msg: Option<String>,
}

impl Store {
    pub async fn create_course(
        &self,
        user_id: &str,
        query: &str,
        total_time_hours: i64,
        language: &str,
        difficulty: &str,
    ) -> Result<Course> {
        let user_id = user_id.to_owned();
        let query = query.to_owned();
        let language = language.to_owned();
        let difficulty = difficulty.to_owned();
        let id = self
            .with_conn(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO courses (user_id, query, total_time_hours, language, difficulty, status, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, 'creating', ?6)
                    "#,
                    params![user_id, query, total_time_hours, language, difficulty, now_sql()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_course(id)
            .await?
            .ok_or_else(|| anyhow!("course vanished after insert"))
    }

    pub async fn get_course(&self, course_id: i64) -> Result<Option<Course>> {
        self.with_conn(move |conn| {
            let course = conn
                .query_row(
                    &format!("{SELECT_COURSE} WHERE id = ?1"),
                    params![course_id],
                    row_to_course,
                )
                .optional()?;
            Ok(course)
        })
        .await
    }

    pub async fn list_courses_by_user(
        &self,
        user_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Course>> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COURSE} WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(params![user_id, limit, offset], row_to_course)?;
            collect(rows)
        })
        .await
    }

    pub async fn list_public_courses(&self, offset: i64, limit: i64) -> Result<Vec<Course>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COURSE} WHERE is_public = 1 AND status = 'finished' ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit, offset], row_to_course)?;
            collect(rows)
        })
        .await
    }

    /// Number of courses the user currently has, any status. Feeds the
    /// present-courses quota.
    pub async fn count_courses_by_user(&self, user_id: &str) -> Result<i64> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM courses WHERE user_id = ?1",
                params![user_id],
                |r| r.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    pub async fn count_completed_chapters(&self, course_id: i64) -> Result<i64> {
        self.with_conn(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM chapters WHERE course_id = ?1 AND is_completed = 1",
                params![course_id],
                |r| r.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    pub async fn update_course(
        &self,
        course_id: i64,
        update: CourseUpdate,
    ) -> Result<Option<Course>> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                UPDATE courses SET
                    session_id = COALESCE(?2, session_id),
                    title = COALESCE(?3, title),
                    description = COALESCE(?4, description),
                    image_url = COALESCE(?5, image_url),
                    chapter_count = COALESCE(?6, chapter_count),
                    total_time_hours = COALESCE(?7, total_time_hours),
                    error_msg = COALESCE(?8, error_msg)
                WHERE id = ?1
                "#,
                params![
                    course_id,
                    update.session_id,
                    update.title,
                    update.description,
                    update.image_url,
                    update.chapter_count,
                    update.total_time_hours,
                    update.error_msg,
                ],
            )?;
            Ok(())
        })
        .await?;
        self.get_course(course_id).await
    }

    pub async fn update_course_status(&self, course_id: i64, status: CourseStatus) -> Result<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE courses SET status = ?2 WHERE id = ?1",
                params![course_id, status.as_str()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn set_course_public(&self, course_id: i64, is_public: bool) -> Result<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE courses SET is_public = ?2 WHERE id = ?1",
                params![course_id, is_public],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Deletes a course; chapters, questions, bound files, notes and chat
    /// history go with it through the foreign key cascade.
    pub async fn delete_course(&self, course_id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM courses WHERE id = ?1", params![course_id])?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Flips every course stuck in `creating` for longer than `max_age` to
    /// `failed`. Returns how many rows were touched.
    pub async fn fail_stuck_courses(&self, max_age: Duration) -> Result<usize> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        self.with_conn(move |conn| {
            let affected = conn.execute(
                r#"
                UPDATE courses
                SET status = 'failed', error_msg = 'Course creation timed out.'
                WHERE status = 'creating' AND created_at < ?1
                "#,
                params![cutoff],
            )?;
            Ok(affected)
        })
        .await
    }
}

const SELECT_COURSE: &str = r#"
SELECT id, user_id, query, total_time_hours, language, difficulty, status,
       session_id, title, description, image_url, chapter_count, error_msg,
       is_public, created_at
FROM courses
"#;

fn row_to_course(row: &Row<'_>) -> rusqlite::Result<Course> {
    let status_raw: String = row.get(6)?;
    let created_at_raw: String = row.get(14)?;
    Ok(Course {
        id: row.get(0)?,
        user_id: row.get(1)?,
        query: row.get(2)?,
        total_time_hours: row.get(3)?,
        language: row.get(4)?,
        difficulty: row.get(5)?,
        status: CourseStatus::parse(&status_raw).unwrap_or(CourseStatus::Failed),
        session_id: row.get(7)?,
        title: row.get(8)?,
        description: row.get(9)?,
        image_url: row.get(10)?,
        chapter_count: row.get(11)?,
        error_msg: row.get(12)?,
        is_public: row.get(13)?,
        created_at: parse_datetime_sql(&created_at_raw)?,
    })
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<Course>>,
) -> Result<Vec<Course>> {
    let mut courses = Vec::new();
    for row in rows {
        courses.push(row?);
    }
    Ok(courses)
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
    async fn create_course_starts_creating() {
        let (store, user_id) = store_with_user().await;
        let course = store
            .create_course(&user_id, "rust basics", 3, "English", "Beginner")
            .await
            .unwrap();
        assert_eq!(course.status, CourseStatus::Creating);
        assert!(course.title.is_none());
        assert!(!course.is_public);
    }

    #[tokio::test]
    async fn update_course_keeps_unset_fields() {
        let (store, user_id) = store_with_user().await;
        let course = store
            .create_course(&user_id, "rust basics", 3, "English", "Beginner")
            .await
            .unwrap();
        store
            .update_course(
                course.id,
                CourseUpdate {
                    title: Some("Rust Basics".into()),
                    session_id: Some("sess-1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let after = store
            .update_course(
                course.id,
                CourseUpdate {
                    chapter_count: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.title.as_deref(), Some("Rust Basics"));
        assert_eq!(after.session_id.as_deref(), Some("sess-1"));
        assert_eq!(after.chapter_count, Some(5));
    }

    #[tokio::test]
    async fn session_id_is_unique() {
        let (store, user_id) = store_with_user().await;
        let first = store
            .create_course(&user_id, "a", 1, "English", "Easy")
            .await
            .unwrap();
        let second = store
            .create_course(&user_id, "b", 1, "English", "Easy")
            .await
            .unwrap();
        store
            .update_course(
                first.id,
                CourseUpdate {
                    session_id: Some("sess-dup".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let clash = store
            .update_course(
                second.id,
                CourseUpdate {
                    session_id: Some("sess-dup".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(clash.is_err());
    }

    #[tokio::test]
    async fn public_listing_only_shows_finished_public_courses() {
        let (store, user_id) = store_with_user().await;
        let hidden = store
            .create_course(&user_id, "private", 1, "English", "Easy")
            .await
            .unwrap();
        let public = store
            .create_course(&user_id, "shared", 1, "English", "Easy")
            .await
            .unwrap();
        store.set_course_public(public.id, true).await.unwrap();
        store
            .update_course_status(public.id, CourseStatus::Finished)
            .await
            .unwrap();
        store.set_course_public(hidden.id, false).await.unwrap();

        let listed = store.list_public_courses(0, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, public.id);
    }

    #[tokio::test]
    async fn fail_stuck_courses_only_touches_old_creating_rows() {
        let (store, user_id) = store_with_user().await;
        let stuck = store
            .create_course(&user_id, "stuck", 1, "English", "Easy")
            .await
            .unwrap();
        let fresh = store
            .create_course(&user_id, "fresh", 1, "English", "Easy")
            .await
            .unwrap();
        let finished = store
            .create_course(&user_id, "done", 1, "English", "Easy")
            .await
            .unwrap();
        store
            .update_course_status(finished.id, CourseStatus::Finished)
            .await
            .unwrap();

        let three_hours_ago = (Utc::now() - Duration::hours(3)).to_rfc3339();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE courses SET created_at = ?2 WHERE id = ?1 OR id = ?3",
                    params![stuck.id, three_hours_ago, finished.id],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let affected = store.fail_stuck_courses(Duration::hours(2)).await.unwrap();
        assert_eq!(affected, 1);

        let stuck_after = store.get_course(stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck_after.status, CourseStatus::Failed);
        assert_eq!(
            stuck_after.error_msg.as_deref(),
            Some("Course creation timed out.")
        );

        let fresh_after = store.get_course(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh_after.status, CourseStatus::Creating);
        let finished_after = store.get_course(finished.id).await.unwrap().unwrap();
        assert_eq!(finished_after.status, CourseStatus::Finished);
    }

    #[tokio::test]
    async fn delete_course_cascades_to_chapters() {
        let (store, user_id) = store_with_user().await;
        let course = store
            .create_course(&user_id, "gone soon", 1, "English", "Easy")
            .await
            .unwrap();
        store
            .create_chapter(crate::NewChapter {
                course_id: course.id,
                idx: 1,
                caption: "Only".into(),
                summary: None,
                content: "() => { return null; }".into(),
                time_minutes: 5,
                image_url: None,
            })
            .await
            .unwrap();

        assert!(store.delete_course(course.id).await.unwrap());
        assert!(store.list_chapters(course.id).await.unwrap().is_empty());
    }
}
