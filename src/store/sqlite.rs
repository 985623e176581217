//! SQLite-backed mapping store
//!
//! rusqlite is synchronous, so every statement runs on the blocking pool
//! behind a single connection mutex. `INSERT OR REPLACE` deletes rows that
//! conflict on either unique column before inserting, which gives the
//! last-write-wins upsert without a transaction.

use super::MappingStore;
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::ChatId;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_phone_mapping (
    telegram_id  INTEGER PRIMARY KEY,
    phone_number TEXT    NOT NULL UNIQUE,
    updated_at   TEXT    NOT NULL
);
";

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// Mapping store persisted in a SQLite file
pub struct SqliteMappingStore {
    conn: SharedConnection,
}

impl SqliteMappingStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::bootstrap(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    async fn with_conn<T, F>(&self, ctx: &CallContext, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        ctx.run(async move {
            tokio::task::spawn_blocking(move || {
                let guard = conn
                    .lock()
                    .map_err(|_| Error::StoreUnavailable("connection lock poisoned".to_string()))?;
                let conn = guard
                    .as_ref()
                    .ok_or_else(|| Error::StoreUnavailable("store is closed".to_string()))?;
                f(conn)
            })
            .await
            .map_err(|e| Error::StoreUnavailable(format!("store task failed: {}", e)))?
        })
        .await
    }
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn lookup_chat_by_phone(&self, ctx: &CallContext, phone: &str) -> Result<ChatId> {
        let phone = phone.to_string();
        self.with_conn(ctx, move |conn| {
            conn.query_row(
                "SELECT telegram_id FROM user_phone_mapping WHERE phone_number = ?1",
                params![phone],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .ok_or(Error::NotFound)
        })
        .await
    }

    async fn lookup_phone_by_chat(&self, ctx: &CallContext, chat: ChatId) -> Result<String> {
        self.with_conn(ctx, move |conn| {
            conn.query_row(
                "SELECT phone_number FROM user_phone_mapping WHERE telegram_id = ?1",
                params![chat],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or(Error::NotFound)
        })
        .await
    }

    async fn upsert_mapping(&self, ctx: &CallContext, phone: &str, chat: ChatId) -> Result<()> {
        let phone = phone.to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.with_conn(ctx, move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO user_phone_mapping (telegram_id, phone_number, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![chat, phone, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::StoreUnavailable("connection lock poisoned".to_string()))?;
            match guard.take() {
                Some(conn) => conn.close().map_err(|(_, e)| Error::from(e)),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| Error::StoreUnavailable(format!("store task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
