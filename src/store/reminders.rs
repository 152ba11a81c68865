//! Reminder rows: one-shot messages keyed by a UTC minute timestamp.

use rusqlite::{params, Row};

use super::{with_connection, Store, StoreError};

/// A reminder stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub id: i64,
    pub user_id: i64,
    pub channel_id: i64,
    pub message: String,
    /// `YYYY-MM-DD HH:MM`, always UTC.
    pub when_utc: String,
}

impl Reminder {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            channel_id: row.get(2)?,
            message: row.get(3)?,
            when_utc: row.get(4)?,
        })
    }
}

/// Which reminders a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderScope {
    All,
    UserInChannel { user_id: i64, channel_id: i64 },
}

impl Store {
    pub async fn add_reminder(
        &self,
        user_id: i64,
        channel_id: i64,
        message: &str,
        when_utc: &str,
    ) -> Result<i64, StoreError> {
        let message = message.to_string();
        let when_utc = when_utc.to_string();
        with_connection(&self.reminders_path, move |conn| {
            conn.execute(
                "INSERT INTO reminders (user_id, channel_id, message, when_utc) VALUES (?1, ?2, ?3, ?4)",
                params![user_id, channel_id, message, when_utc],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Reminders with `when_utc <= now_utc`. The column is fixed-width and
    /// zero-padded, so string order is time order.
    pub async fn due_reminders(&self, now_utc: &str) -> Result<Vec<Reminder>, StoreError> {
        let now_utc = now_utc.to_string();
        with_connection(&self.reminders_path, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, channel_id, message, when_utc FROM reminders
                 WHERE when_utc <= ?1 ORDER BY when_utc, id",
            )?;
            let rows = stmt.query_map(params![now_utc], Reminder::from_row)?;
            rows.collect()
        })
        .await
    }

    /// Returns false if no such reminder existed.
    pub async fn delete_reminder(&self, id: i64) -> Result<bool, StoreError> {
        with_connection(&self.reminders_path, move |conn| {
            let n = conn.execute("DELETE FROM reminders WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn list_reminders(&self, scope: ReminderScope) -> Result<Vec<Reminder>, StoreError> {
        with_connection(&self.reminders_path, move |conn| match scope {
            ReminderScope::All => {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, channel_id, message, when_utc FROM reminders
                     ORDER BY when_utc, id",
                )?;
                let rows = stmt.query_map([], Reminder::from_row)?;
                rows.collect()
            }
            ReminderScope::UserInChannel { user_id, channel_id } => {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, channel_id, message, when_utc FROM reminders
                     WHERE user_id = ?1 AND channel_id = ?2 ORDER BY when_utc, id",
                )?;
                let rows = stmt.query_map(params![user_id, channel_id], Reminder::from_row)?;
                rows.collect()
            }
        })
        .await
    }
}
