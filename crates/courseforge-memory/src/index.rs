use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::task;

use crate::embedding::EmbeddingProvider;

/// One stored passage with its metadata and the query distance.
#[derive(Debug, Clone)]
pub struct Passage {
    pub content_id: String,
    pub text: String,
    pub metadata: Value,
    pub distance: f64,
}

/// Per-course vector collections on a single SQLite file. Each collection
/// gets its own passage table and vec0 virtual table, created lazily on
/// first write.
#[derive(Clone)]
pub struct VectorIndex {
    db: Arc<Mutex<Connection>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

/// Initialize sqlite-vec extension. Must be called before Connection::open().
fn init_sqlite_vec() {
    use rusqlite::ffi::{sqlite3, sqlite3_api_routines, sqlite3_auto_extension};

    type Sqlite3AutoExtFn =
        unsafe extern "C" fn(*mut sqlite3, *mut *mut i8, *const sqlite3_api_routines) -> i32;

    unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<*const (), Sqlite3AutoExtFn>(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    }
}

impl VectorIndex {
    pub fn open(path: &str, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open(path)?;
        Self::with_connection(conn, embedder)
    }

    pub fn open_in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, embedder)
    }

    fn with_connection(conn: Connection, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dims INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.embedder)
    }

    /// Embeds `text` and stores it under `(collection, content_id)`.
    /// Idempotent by content id: a second upsert with the same id replaces
    /// the previous row.
    pub async fn upsert(
        &self,
        collection: &str,
        content_id: &str,
        text: &str,
        metadata: Value,
    ) -> Result<()> {
        let embedded = self.embedder.embed(&[text.to_owned()]).await?;
        let embedding = embedded
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding provider returned no vector"))?;
        let embedding_json = embedding_to_json(&embedding);
        let dims = embedded.dimensions;

        let table = sanitize(collection);
        let content_id = content_id.to_owned();
        let text = text.to_owned();
        let metadata_json = metadata.to_string();

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            ensure_collection(&conn, &table, dims)?;
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO passages_{table} (content_id, text, metadata) VALUES (?1, ?2, ?3)"
                ),
                params![content_id, text, metadata_json],
            )?;
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO vec_{table} (content_id, embedding) VALUES (?1, ?2)"
                ),
                params![content_id, embedding_json],
            )?;
            tx.commit()?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    /// Top-k passages by cosine distance. An absent collection yields an
    /// empty result rather than an error.
    pub async fn query(&self, collection: &str, text: &str, k: usize) -> Result<Vec<Passage>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedded = self.embedder.embed(&[text.to_owned()]).await?;
        let embedding = embedded
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding provider returned no query vector"))?;
        let embedding_json = embedding_to_json(&embedding);

        let table = sanitize(collection);
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;

            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM collections WHERE name = ?1",
                    params![table],
                    |r| r.get(0),
                )
                .unwrap_or(false);
            if !exists {
                return Ok(Vec::new());
            }

            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT v.content_id, p.text, p.metadata, v.distance
                FROM vec_{table} v
                JOIN passages_{table} p ON p.content_id = v.content_id
                WHERE v.embedding MATCH ?1 AND k = ?2
                "#
            ))?;
            let rows = stmt.query_map(params![embedding_json, k as i64], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, f64>(3)?,
                ))
            })?;

            let mut passages = Vec::new();
            for row in rows {
                let (content_id, text, metadata_raw, distance) = row?;
                let metadata = serde_json::from_str(&metadata_raw).unwrap_or(Value::Null);
                passages.push(Passage {
                    content_id,
                    text,
                    metadata,
                    distance,
                });
            }
            passages.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            Ok::<Vec<Passage>, anyhow::Error>(passages)
        })
        .await?
    }

    pub async fn delete(&self, collection: &str, content_id: &str) -> Result<bool> {
        let table = sanitize(collection);
        let content_id = content_id.to_owned();
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM collections WHERE name = ?1",
                    params![table],
                    |r| r.get(0),
                )
                .unwrap_or(false);
            if !exists {
                return Ok(false);
            }
            conn.execute(
                &format!("DELETE FROM vec_{table} WHERE content_id = ?1"),
                params![content_id],
            )?;
            let deleted = conn.execute(
                &format!("DELETE FROM passages_{table} WHERE content_id = ?1"),
                params![content_id],
            )?;
            Ok::<bool, anyhow::Error>(deleted > 0)
        })
        .await?
    }
}

fn ensure_collection(conn: &Connection, table: &str, dims: usize) -> Result<()> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT dims FROM collections WHERE name = ?1",
            params![table],
            |r| r.get(0),
        )
        .optional()?;

    match current {
        Some(existing) if existing == dims as i64 => Ok(()),
        Some(_) => {
            conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS vec_{table}; DROP TABLE IF EXISTS passages_{table};"
            ))?;
            create_collection(conn, table, dims)
        }
        None => create_collection(conn, table, dims),
    }
}

fn create_collection(conn: &Connection, table: &str, dims: usize) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS passages_{table} (
            content_id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            metadata TEXT NOT NULL
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS vec_{table} USING vec0(content_id TEXT PRIMARY KEY, embedding float[{dims}]);
        "#
    ))?;
    conn.execute(
        "INSERT OR REPLACE INTO collections (name, dims) VALUES (?1, ?2)",
        params![table, dims as i64],
    )?;
    Ok(())
}

/// Collection names become part of table names; anything outside
/// [A-Za-z0-9_] is replaced.
fn sanitize(collection: &str) -> String {
    collection
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn embedding_to_json(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|v| format!("{v}")).collect();
    format!("[{}]", parts.join(","))
}
