//! SQLite credential backend

use super::CredentialBackend;
use crate::error::IntegrationError;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;

/// Service name used on errors not tied to one service
const BACKEND_NAME: &str = "credential-store";

/// SQLite backend configuration
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    pub wal_mode: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("integration-hub");
        path.push("credentials.db");

        Self {
            path,
            wal_mode: true,
        }
    }
}

/// Credential backend on a single SQLite table
///
/// rusqlite is blocking, so every statement runs on the blocking pool.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open or create the database
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IntegrationError::unknown(
                    BACKEND_NAME,
                    format!("Failed to create {}: {}", parent.display(), e),
                )
                .with_cause(e)
            })?;
        }

        tracing::info!(path = %config.path.display(), "Opening credential database");

        let conn = Connection::open(&config.path).map_err(|e| storage_error(BACKEND_NAME, e))?;
        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| storage_error(BACKEND_NAME, e))?;
        }

        Self::with_connection(conn)
    }

    /// Database that lives only as long as this backend
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage_error(BACKEND_NAME, e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                service TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| storage_error(BACKEND_NAME, e))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, service_name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let service = service_name.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await;

        match joined {
            Ok(result) => result.map_err(|e| storage_error(&service, e)),
            Err(e) => Err(IntegrationError::unknown(
                &service,
                format!("Storage task failed: {}", e),
            )
            .with_cause(e)),
        }
    }
}

#[async_trait]
impl CredentialBackend for SqliteBackend {
    async fn load(&self, service_name: &str) -> Result<Option<String>> {
        let key = service_name.to_string();
        self.run(service_name, move |conn| {
            conn.query_row(
                "SELECT payload FROM credentials WHERE service = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn save(&self, service_name: &str, payload: &str) -> Result<()> {
        let key = service_name.to_string();
        let payload = payload.to_string();
        let now = chrono::Utc::now().timestamp_millis();

        tracing::debug!(service = service_name, "Saving credentials");

        self.run(service_name, move |conn| {
            conn.execute(
                r#"
                INSERT INTO credentials (service, payload, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(service) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
                params![key, payload, now],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove(&self, service_name: &str) -> Result<()> {
        let key = service_name.to_string();
        self.run(service_name, move |conn| {
            conn.execute("DELETE FROM credentials WHERE service = ?", params![key])
                .map(|_| ())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.run(BACKEND_NAME, |conn| {
            let mut stmt = conn.prepare("SELECT service FROM credentials ORDER BY service")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }
}

fn storage_error(service_name: &str, err: rusqlite::Error) -> IntegrationError {
    IntegrationError::unknown(service_name, format!("Credential storage error: {}", err))
        .with_cause(err)
}
