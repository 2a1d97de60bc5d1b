use anyhow::{anyhow, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::models::Chapter;
use crate::{now_sql, parse_datetime_sql, Store};

#[derive(Debug, Clone)]
pub struct NewChapter {
    pub course_id: i64,
    /// 1-based position within the course, unique per course.
    pub idx: i64,
    pub caption: String,
    pub summary: Option<String>,
    pub content: String,
    pub time_minutes: i64,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChapterUpdate {
    pub caption: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub time_minutes: Option<i64>,
    pub image_url: Option<String>,
}

impl Store {
    pub async fn create_chapter(&self, new_chapter: NewChapter) -> Result<Chapter> {
        let id = self
            .with_conn(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO chapters (course_id, idx, caption, summary, content, time_minutes, is_completed, image_url, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)
                    "#,
                    params![
                        new_chapter.course_id,
                        new_chapter.idx,
                        new_chapter.caption,
                        new_chapter.summary,
                        new_chapter.content,
                        new_chapter.time_minutes,
                        new_chapter.image_url,
                        now_sql(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_chapter(id)
            .await?
            .ok_or_else(|| anyhow!("chapter vanished after insert"))
    }

    pub async fn get_chapter(&self, chapter_id: i64) -> Result<Option<Chapter>> {
        self.with_conn(move |conn| {
            let chapter = conn
                .query_row(
                    &format!("{SELECT_CHAPTER} WHERE id = ?1"),
                    params![chapter_id],
                    row_to_chapter,
                )
                .optional()?;
            Ok(chapter)
        })
        .await
    }

    pub async fn get_chapter_in_course(
        &self,
        course_id: i64,
        chapter_id: i64,
    ) -> Result<Option<Chapter>> {
        self.with_conn(move |conn| {
            let chapter = conn
                .query_row(
                    &format!("{SELECT_CHAPTER} WHERE id = ?1 AND course_id = ?2"),
                    params![chapter_id, course_id],
                    row_to_chapter,
                )
                .optional()?;
            Ok(chapter)
        })
        .await
    }

    pub async fn list_chapters(&self, course_id: i64) -> Result<Vec<Chapter>> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_CHAPTER} WHERE course_id = ?1 ORDER BY idx"))?;
            let rows = stmt.query_map(params![course_id], row_to_chapter)?;
            let mut chapters = Vec::new();
            for row in rows {
                chapters.push(row?);
            }
            Ok(chapters)
        })
        .await
    }

    pub async fn update_chapter(
        &self,
        chapter_id: i64,
        update: ChapterUpdate,
    ) -> Result<Option<Chapter>> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                UPDATE chapters SET
                    caption = COALESCE(?2, caption),
                    summary = COALESCE(?3, summary),
                    content = COALESCE(?4, content),
                    time_minutes = COALESCE(?5, time_minutes),
                    image_url = COALESCE(?6, image_url)
                WHERE id = ?1
                "#,
                params![
                    chapter_id,
                    update.caption,
                    update.summary,
                    update.content,
                    update.time_minutes,
                    update.image_url,
                ],
            )?;
            Ok(())
        })
        .await?;
        self.get_chapter(chapter_id).await
    }

    pub async fn set_chapter_completed(&self, chapter_id: i64, completed: bool) -> Result<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE chapters SET is_completed = ?2 WHERE id = ?1",
                params![chapter_id, completed],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn delete_chapter(&self, chapter_id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let deleted =
                conn.execute("DELETE FROM chapters WHERE id = ?1", params![chapter_id])?;
            Ok(deleted > 0)
        })
        .await
    }
}

const SELECT_CHAPTER: &str = r#"
SELECT id, course_id, idx, caption, summary, content, time_minutes, is_completed, image_url, created_at
FROM chapters
"#;

fn row_to_chapter(row: &Row<'_>) -> rusqlite::Result<Chapter> {
    let created_at_raw: String = row.get(9)?;
    Ok(Chapter {
        id: row.get(0)?,
        course_id: row.get(1)?,
        idx: row.get(2)?,
        caption: row.get(3)?,
        summary: row.get(4)?,
        content: row.get(5)?,
        time_minutes: row.get(6)?,
        is_completed: row.get(7)?,
        image_url: row.get(8)?,
        created_at: parse_datetime_sql(&created_at_raw)?,
    })
}
