use anyhow::{anyhow, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::models::StoredFile;
use crate::{now_sql, parse_datetime_sql, Store};

macro_rules! file_table_impl {
    ($insert:ident, $get:ident, $by_ids:ident, $list:ident, $bind:ident, $delete:ident, $table:literal) => {
        pub async fn $insert(
            &self,
            user_id: &str,
            filename: &str,
            content_type: &str,
            data: Vec<u8>,
        ) -> Result<StoredFile> {
            let user_id = user_id.to_owned();
            let filename = filename.to_owned();
            let content_type = content_type.to_owned();
            let id = self
                .with_conn(move |conn| {
                    conn.execute(
                        concat!(
                            "INSERT INTO ",
                            $table,
                            " (user_id, filename, content_type, data, created_at) VALUES (?1, ?2, ?3, ?4, ?5)"
                        ),
                        params![user_id, filename, content_type, data, now_sql()],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await?;
            self.$get(id)
                .await?
                .ok_or_else(|| anyhow!("stored file vanished after insert"))
        }

        pub async fn $get(&self, id: i64) -> Result<Option<StoredFile>> {
            self.with_conn(move |conn| {
                let file = conn
                    .query_row(
                        concat!(
                            "SELECT id, user_id, course_id, filename, content_type, data, created_at FROM ",
                            $table,
                            " WHERE id = ?1"
                        ),
                        params![id],
                        row_to_file,
                    )
                    .optional()?;
                Ok(file)
            })
            .await
        }

        /// Fetches the listed rows owned by `user_id`; ids of other users are
        /// silently skipped.
        pub async fn $by_ids(&self, user_id: &str, ids: &[i64]) -> Result<Vec<StoredFile>> {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let user_id = user_id.to_owned();
            let ids = ids.to_vec();
            self.with_conn(move |conn| {
                let placeholders = std::iter::repeat("?")
                    .take(ids.len())
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT id, user_id, course_id, filename, content_type, data, created_at FROM {} WHERE user_id = ? AND id IN ({placeholders}) ORDER BY id",
                    $table,
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id)];
                for id in ids {
                    values.push(Box::new(id));
                }
                let rows = stmt.query_map(
                    rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                    row_to_file,
                )?;
                let mut files = Vec::new();
                for row in rows {
                    files.push(row?);
                }
                Ok(files)
            })
            .await
        }

        pub async fn $list(
            &self,
            user_id: &str,
            course_id: Option<i64>,
        ) -> Result<Vec<StoredFile>> {
            let user_id = user_id.to_owned();
            self.with_conn(move |conn| {
                let mut files = Vec::new();
                match course_id {
                    Some(course_id) => {
                        let mut stmt = conn.prepare(concat!(
                            "SELECT id, user_id, course_id, filename, content_type, data, created_at FROM ",
                            $table,
                            " WHERE user_id = ?1 AND course_id = ?2 ORDER BY id"
                        ))?;
                        let rows = stmt.query_map(params![user_id, course_id], row_to_file)?;
                        for row in rows {
                            files.push(row?);
                        }
                    }
                    None => {
                        let mut stmt = conn.prepare(concat!(
                            "SELECT id, user_id, course_id, filename, content_type, data, created_at FROM ",
                            $table,
                            " WHERE user_id = ?1 AND course_id IS NULL ORDER BY id"
                        ))?;
                        let rows = stmt.query_map(params![user_id], row_to_file)?;
                        for row in rows {
                            files.push(row?);
                        }
                    }
                }
                Ok(files)
            })
            .await
        }

        /// Binds the row to a course. A file is bound at most once; a second
        /// bind to a different course is rejected.
        pub async fn $bind(&self, id: i64, course_id: i64) -> Result<bool> {
            self.with_conn(move |conn| {
                let existing: Option<Option<i64>> = conn
                    .query_row(
                        concat!("SELECT course_id FROM ", $table, " WHERE id = ?1"),
                        params![id],
                        |r| r.get(0),
                    )
                    .optional()?;
                match existing {
                    None => Ok(false),
                    Some(Some(bound)) if bound != course_id => Err(anyhow!(
                        "file {id} is already bound to course {bound}"
                    )),
                    Some(_) => {
                        conn.execute(
                            concat!("UPDATE ", $table, " SET course_id = ?2 WHERE id = ?1"),
                            params![id, course_id],
                        )?;
                        Ok(true)
                    }
                }
            })
            .await
        }

        pub async fn $delete(&self, id: i64) -> Result<bool> {
            self.with_conn(move |conn| {
                let deleted = conn.execute(
                    concat!("DELETE FROM ", $table, " WHERE id = ?1"),
                    params![id],
                )?;
                Ok(deleted > 0)
            })
            .await
        }
    };
}

impl Store {
    file_table_impl!(
        insert_document,
        get_document,
        documents_by_ids,
        list_documents,
        bind_document_to_course,
        delete_document,
        "documents"
    );

    file_table_impl!(
        insert_image,
        get_image,
        images_by_ids,
        list_images,
        bind_image_to_course,
        delete_image,
        "images"
    );
}

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<StoredFile> {
    let created_at_raw: String = row.get(6)?;
    Ok(StoredFile {
        id: row.get(0)?,
        user_id: row.get(1)?,
        course_id: row.get(2)?,
        filename: row.get(3)?,
        content_type: row.get(4)?,
        data: row.get(5)?,
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
    async fn document_round_trip_preserves_bytes() {
        let (store, user_id) = store_with_user().await;
        let payload = vec![0u8, 1, 2, 254, 255];
        let doc = store
            .insert_document(&user_id, "raw.pdf", "application/pdf", payload.clone())
            .await
            .unwrap();
        let loaded = store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.data, payload);
        assert_eq!(loaded.filename, "raw.pdf");
        assert!(loaded.course_id.is_none());
    }

    #[tokio::test]
    async fn documents_by_ids_skips_foreign_rows() {
        let (store, user_id) = store_with_user().await;
        let other = store
            .create_user(NewUser {
                id: "user-2".into(),
                username: "intruder".into(),
                email: "intruder@example.com".into(),
                hashed_password: "hash".into(),
                is_admin: false,
            })
            .await
            .unwrap();
        let mine = store
            .insert_document(&user_id, "mine.pdf", "application/pdf", vec![1])
            .await
            .unwrap();
        let theirs = store
            .insert_document(&other.id, "theirs.pdf", "application/pdf", vec![2])
            .await
            .unwrap();

        let fetched = store
            .documents_by_ids(&user_id, &[mine.id, theirs.id])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, mine.id);
    }

    #[tokio::test]
    async fn bind_document_once_only() {
        let (store, user_id) = store_with_user().await;
        let course_a = store
            .create_course(&user_id, "a", 1, "English", "Easy")
            .await
            .unwrap();
        let course_b = store
            .create_course(&user_id, "b", 1, "English", "Easy")
            .await
            .unwrap();
        let doc = store
            .insert_document(&user_id, "a.pdf", "application/pdf", vec![1])
            .await
            .unwrap();

        assert!(store.bind_document_to_course(doc.id, course_a.id).await.unwrap());
        // Re-binding to the same course is a no-op.
        assert!(store.bind_document_to_course(doc.id, course_a.id).await.unwrap());
        assert!(store
            .bind_document_to_course(doc.id, course_b.id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn list_documents_filters_by_binding() {
        let (store, user_id) = store_with_user().await;
        let course = store
            .create_course(&user_id, "a", 1, "English", "Easy")
            .await
            .unwrap();
        let bound = store
            .insert_document(&user_id, "bound.pdf", "application/pdf", vec![1])
            .await
            .unwrap();
        store
            .insert_document(&user_id, "loose.pdf", "application/pdf", vec![2])
            .await
            .unwrap();
        store.bind_document_to_course(bound.id, course.id).await.unwrap();

        let for_course = store
            .list_documents(&user_id, Some(course.id))
            .await
            .unwrap();
        assert_eq!(for_course.len(), 1);
        assert_eq!(for_course[0].filename, "bound.pdf");

        let unbound = store.list_documents(&user_id, None).await.unwrap();
        assert_eq!(unbound.len(), 1);
        assert_eq!(unbound[0].filename, "loose.pdf");
    }

    #[tokio::test]
    async fn course_deletion_removes_bound_files() {
        let (store, user_id) = store_with_user().await;
        let course = store
            .create_course(&user_id, "a", 1, "English", "Easy")
            .await
            .unwrap();
        let image = store
            .insert_image(&user_id, "pic.png", "image/png", vec![9])
            .await
            .unwrap();
        store.bind_image_to_course(image.id, course.id).await.unwrap();

        store.delete_course(course.id).await.unwrap();
        assert!(store.get_image(image.id).await.unwrap().is_none());
    }
}
