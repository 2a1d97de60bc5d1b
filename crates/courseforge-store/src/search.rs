use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::Store;

/// One row of the combined course/chapter search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_title: Option<String>,
}

impl Store {
    /// Substring search across the caller's courses and chapters. Title and
    /// caption matches rank before description/summary/content matches;
    /// courses before chapters within the same rank.
    pub async fn search_courses_and_chapters(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let trimmed = query.trim();
        if trimmed.chars().count() < 2 {
            return Ok(Vec::new());
        }
        let user_id = user_id.to_owned();
        let pattern = format!("%{}%", trimmed.to_lowercase());

        self.with_conn(move |conn| {
            let mut hits: Vec<(i64, SearchHit)> = Vec::new();

            let mut course_stmt = conn.prepare(
                r#"
                SELECT id, title, description,
                       CASE WHEN LOWER(COALESCE(title, '')) LIKE ?2 THEN 0 ELSE 1 END AS rank
                FROM courses
                WHERE user_id = ?1
                  AND (LOWER(COALESCE(title, '')) LIKE ?2 OR LOWER(COALESCE(description, '')) LIKE ?2)
                ORDER BY rank, id
                "#,
            )?;
            let course_rows = course_stmt.query_map(params![user_id, pattern], |row| {
                let id: i64 = row.get(0)?;
                let title: Option<String> = row.get(1)?;
                let description: Option<String> = row.get(2)?;
                let rank: i64 = row.get(3)?;
                Ok((
                    rank,
                    SearchHit {
                        id: id.to_string(),
                        kind: "course".into(),
                        title: title.unwrap_or_default(),
                        description,
                        course_id: Some(id.to_string()),
                        course_title: None,
                    },
                ))
            })?;
            for row in course_rows {
                hits.push(row?);
            }

            let mut chapter_stmt = conn.prepare(
                r#"
                SELECT ch.id, ch.caption, ch.summary, ch.content, ch.course_id, co.title,
                       CASE WHEN LOWER(ch.caption) LIKE ?2 THEN 0 ELSE 1 END AS rank
                FROM chapters ch
                JOIN courses co ON co.id = ch.course_id
                WHERE co.user_id = ?1
                  AND (LOWER(ch.caption) LIKE ?2
                       OR LOWER(COALESCE(ch.summary, '')) LIKE ?2
                       OR LOWER(ch.content) LIKE ?2)
                ORDER BY rank, ch.id
                "#,
            )?;
            let chapter_rows = chapter_stmt.query_map(params![user_id, pattern], |row| {
                let id: i64 = row.get(0)?;
                let caption: String = row.get(1)?;
                let summary: Option<String> = row.get(2)?;
                let content: String = row.get(3)?;
                let course_id: i64 = row.get(4)?;
                let course_title: Option<String> = row.get(5)?;
                let rank: i64 = row.get(6)?;
                let description = summary.or_else(|| {
                    let preview: String = content.chars().take(200).collect();
                    (!preview.is_empty()).then(|| format!("{preview}..."))
                });
                Ok((
                    rank,
                    SearchHit {
                        id: id.to_string(),
                        kind: "chapter".into(),
                        title: caption,
                        description,
                        course_id: Some(course_id.to_string()),
                        course_title,
                    },
                ))
            })?;
            for row in chapter_rows {
                hits.push(row?);
            }

            hits.sort_by_key(|(rank, _)| *rank);
            Ok(hits
                .into_iter()
                .map(|(_, hit)| hit)
                .take(limit)
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;
    use crate::{CourseUpdate, NewChapter};

    async fn seeded_store() -> (Store, String) {
        let store = Store::open_in_memory().unwrap();
        for (id, name) in [("user-1", "owner"), ("user-2", "other")] {
            store
                .create_user(NewUser {
                    id: id.into(),
                    username: name.into(),
                    email: format!("{name}@example.com"),
                    hashed_password: "hash".into(),
                    is_admin: false,
                })
                .await
                .unwrap();
        }
        (store, "user-1".into())
    }

    async fn course_with_title(store: &Store, user: &str, title: &str, description: &str) -> i64 {
        let course = store
            .create_course(user, "query", 1, "English", "Easy")
            .await
            .unwrap();
        store
            .update_course(
                course.id,
                CourseUpdate {
                    title: Some(title.into()),
                    description: Some(description.into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        course.id
    }

    #[tokio::test]
    async fn title_matches_rank_before_description_matches() {
        let (store, user) = seeded_store().await;
        course_with_title(&store, &user, "About cooking", "Rust appears here").await;
        course_with_title(&store, &user, "Rust Basics", "a language course").await;

        let hits = store
            .search_courses_and_chapters(&user, "rust", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Rust Basics");
        assert_eq!(hits[1].title, "About cooking");
    }

    #[tokio::test]
    async fn results_are_scoped_to_the_caller() {
        let (store, user) = seeded_store().await;
        course_with_title(&store, &user, "Rust Basics", "mine").await;
        course_with_title(&store, "user-2", "Rust Advanced", "theirs").await;

        let hits = store
            .search_courses_and_chapters(&user, "rust", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Rust Basics");
    }

    #[tokio::test]
    async fn chapters_surface_with_course_title() {
        let (store, user) = seeded_store().await;
        let course_id = course_with_title(&store, &user, "Rust Basics", "desc").await;
        store
            .create_chapter(NewChapter {
                course_id,
                idx: 1,
                caption: "Ownership and borrowing".into(),
                summary: Some("moves, borrows".into()),
                content: "() => { return <p>ownership</p>; }".into(),
                time_minutes: 20,
                image_url: None,
            })
            .await
            .unwrap();

        let hits = store
            .search_courses_and_chapters(&user, "ownership", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, "chapter");
        assert_eq!(hits[0].course_title.as_deref(), Some("Rust Basics"));
    }

    #[tokio::test]
    async fn short_queries_return_nothing() {
        let (store, user) = seeded_store().await;
        course_with_title(&store, &user, "Rust Basics", "desc").await;
        let hits = store
            .search_courses_and_chapters(&user, "r", 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
