//! Durable SQLite store for reminders, tasks and the member roster.
//!
//! Each table lives in its own file. Every operation opens a fresh
//! connection on the blocking pool, so callers never share cursor state
//! and the async runtime is never stalled by disk I/O.

mod members;
mod reminders;
mod tasks;

pub use members::{Member, MemberStatus};
pub use reminders::{Reminder, ReminderScope};
pub use tasks::{group_by_assignee, Task, TaskGroup};

use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by store operations.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// The blocking worker running the query died.
    Worker(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "database error: {e}"),
            Self::Worker(e) => write!(f, "database worker failed: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Worker(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

/// Handle to the three database files. Holds paths only.
#[derive(Debug, Clone)]
pub struct Store {
    reminders_path: PathBuf,
    tasks_path: PathBuf,
    members_path: PathBuf,
}

impl Store {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            reminders_path: data_dir.join("reminders.db"),
            tasks_path: data_dir.join("tasks.db"),
            members_path: data_dir.join("members.db"),
        }
    }

    /// Create any missing tables. Safe to call on every start.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        with_connection(&self.reminders_path, |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS reminders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    channel_id INTEGER NOT NULL,
                    message TEXT NOT NULL,
                    when_utc TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_reminders_when ON reminders(when_utc);
                "#,
            )
        })
        .await?;

        with_connection(&self.tasks_path, |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    assigner_id INTEGER NOT NULL,
                    assignee_id INTEGER NOT NULL,
                    channel_id INTEGER NOT NULL,
                    task TEXT NOT NULL
                );
                "#,
            )
        })
        .await?;

        with_connection(&self.members_path, |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS members (
                    chat_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    username TEXT,
                    display_name TEXT NOT NULL,
                    is_bot INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'member',
                    PRIMARY KEY (chat_id, user_id)
                );
                CREATE INDEX IF NOT EXISTS idx_members_username ON members(username);
                "#,
            )
        })
        .await?;

        info!(
            "Store ready ({}, {}, {})",
            self.reminders_path.display(),
            self.tasks_path.display(),
            self.members_path.display()
        );
        Ok(())
    }
}

/// Open a fresh connection to `path` and run `f` on the blocking pool.
async fn with_connection<T, F>(path: &Path, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
        let mut conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(f(&mut conn)?)
    })
    .await
    .map_err(|e| StoreError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        let count: i64 = with_connection(&store.reminders_path, |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'reminders'",
                [],
                |row| row.get(0),
            )
        })
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_tables_live_in_separate_files() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        store.initialize().await.unwrap();

        assert!(dir.path().join("reminders.db").exists());
        assert!(dir.path().join("tasks.db").exists());
        assert!(dir.path().join("members.db").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let store = Store::new(Path::new("/nonexistent/gatekeeper/data"));
        let err = store.initialize().await.unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}
