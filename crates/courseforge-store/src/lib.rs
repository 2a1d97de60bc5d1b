//! Relational persistence on SQLite. One connection behind a mutex; every
//! call runs on the blocking pool and holds the guard only for the duration
//! of its own statements, so the handle is always released before the caller
//! awaits anything else.

pub mod migrations;
pub mod models;

mod chapters;
mod chat;
mod courses;
mod files;
mod notes;
mod questions;
mod search;
mod usage;
mod users;

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::task;

pub use chapters::{ChapterUpdate, NewChapter};
pub use courses::CourseUpdate;
pub use models::*;
pub use search::SearchHit;
pub use users::{NewUser, UserUpdate};

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn db(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    /// Runs `f` with the locked connection on the blocking pool. The guard is
    /// dropped before this future resolves.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            f(&conn)
        })
        .await?
    }
}

pub(crate) fn parse_datetime_sql(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_optional_datetime_sql(
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_datetime_sql(&value)).transpose()
}

pub(crate) fn now_sql() -> String {
    Utc::now().to_rfc3339()
}
