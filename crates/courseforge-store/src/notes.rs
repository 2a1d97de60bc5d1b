use anyhow::{anyhow, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::models::Note;
use crate::{now_sql, parse_datetime_sql, Store};

impl Store {
    pub async fn create_note(
        &self,
        course_id: i64,
        chapter_id: i64,
        user_id: &str,
        text: &str,
    ) -> Result<Note> {
        let user_id = user_id.to_owned();
        let text = text.to_owned();
        let id = self
            .with_conn(move |conn| {
                let now = now_sql();
                conn.execute(
                    r#"
                    INSERT INTO notes (course_id, chapter_id, user_id, text, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                    "#,
                    params![course_id, chapter_id, user_id, text, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_note(id)
            .await?
            .ok_or_else(|| anyhow!("note vanished after insert"))
    }

    pub async fn get_note(&self, note_id: i64) -> Result<Option<Note>> {
        self.with_conn(move |conn| {
            let note = conn
                .query_row(
                    &format!("{SELECT_NOTE} WHERE id = ?1"),
                    params![note_id],
                    row_to_note,
                )
                .optional()?;
            Ok(note)
        })
        .await
    }

    pub async fn list_notes(&self, chapter_id: i64, user_id: &str) -> Result<Vec<Note>> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_NOTE} WHERE chapter_id = ?1 AND user_id = ?2 ORDER BY created_at"
            ))?;
            let rows = stmt.query_map(params![chapter_id, user_id], row_to_note)?;
            let mut notes = Vec::new();
            for row in rows {
                notes.push(row?);
            }
            Ok(notes)
        })
        .await
    }

    pub async fn update_note(&self, note_id: i64, text: &str) -> Result<Option<Note>> {
        let text = text.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE notes SET text = ?2, updated_at = ?3 WHERE id = ?1",
                params![note_id, text, now_sql()],
            )?;
            Ok(())
        })
        .await?;
        self.get_note(note_id).await
    }

    pub async fn delete_note(&self, note_id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM notes WHERE id = ?1", params![note_id])?;
            Ok(deleted > 0)
        })
        .await
    }
}

const SELECT_NOTE: &str = r#"
SELECT id, course_id, chapter_id, user_id, text, created_at, updated_at
FROM notes
"#;

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    let created_at_raw: String = row.get(5)?;
    let updated_at_raw: String = row.get(6)?;
    Ok(Note {
        id: row.get(0)?,
        course_id: row.get(1)?,
        chapter_id: row.get(2)?,
        user_id: row.get(3)?,
        text: row.get(4)?,
        created_at: parse_datetime_sql(&created_at_raw)?,
        updated_at: parse_datetime_sql(&updated_at_raw)?,
    })
}
