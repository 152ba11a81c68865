//! Per-chat member roster, fed by group messages and membership updates.

use rusqlite::{params, Row};

use super::{with_connection, Store, StoreError};
use crate::gateway::Identity;

/// Member status in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Member,
    Left,
    Banned,
}

impl MemberStatus {
    fn as_str(self) -> &'static str {
        match self {
            MemberStatus::Member => "member",
            MemberStatus::Left => "left",
            MemberStatus::Banned => "banned",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "left" => MemberStatus::Left,
            "banned" => MemberStatus::Banned,
            _ => MemberStatus::Member,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub chat_id: i64,
    pub identity: Identity,
    pub status: MemberStatus,
}

impl Member {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chat_id: row.get(0)?,
            identity: Identity {
                user_id: row.get(1)?,
                username: row.get(2)?,
                display_name: row.get(3)?,
                is_bot: row.get(4)?,
            },
            status: MemberStatus::parse(&row.get::<_, String>(5)?),
        })
    }
}

impl Store {
    /// Insert or refresh a member and mark them present.
    pub async fn record_member(&self, chat_id: i64, identity: &Identity) -> Result<(), StoreError> {
        let identity = identity.clone();
        with_connection(&self.members_path, move |conn| {
            conn.execute(
                "INSERT INTO members (chat_id, user_id, username, display_name, is_bot, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'member')
                 ON CONFLICT(chat_id, user_id) DO UPDATE SET
                    username = ?3,
                    display_name = ?4,
                    is_bot = ?5,
                    status = 'member'",
                params![
                    chat_id,
                    identity.user_id,
                    identity.username,
                    identity.display_name,
                    identity.is_bot
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Record a departure or ban. Unknown members are ignored.
    pub async fn set_member_status(
        &self,
        chat_id: i64,
        user_id: i64,
        status: MemberStatus,
    ) -> Result<(), StoreError> {
        with_connection(&self.members_path, move |conn| {
            conn.execute(
                "UPDATE members SET status = ?3 WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id, status.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    /// Find a present member of `chat_id` by username (case-insensitive, no `@`).
    pub async fn find_member_by_username(
        &self,
        chat_id: i64,
        username: &str,
    ) -> Result<Option<Member>, StoreError> {
        let username = username.trim_start_matches('@').to_lowercase();
        with_connection(&self.members_path, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, user_id, username, display_name, is_bot, status FROM members
                 WHERE chat_id = ?1 AND LOWER(username) = ?2 AND status = 'member' LIMIT 1",
            )?;
            let mut rows = stmt.query_map(params![chat_id, username], Member::from_row)?;
            rows.next().transpose()
        })
        .await
    }

    /// Every chat in which `user_id` is currently present, first recorded first.
    pub async fn memberships(&self, user_id: i64) -> Result<Vec<Member>, StoreError> {
        with_connection(&self.members_path, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, user_id, username, display_name, is_bot, status FROM members
                 WHERE user_id = ?1 AND status = 'member' ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![user_id], Member::from_row)?;
            rows.collect()
        })
        .await
    }

    /// Present, non-bot members of `chat_id`, ordered by user id.
    pub async fn active_members(&self, chat_id: i64) -> Result<Vec<Member>, StoreError> {
        with_connection(&self.members_path, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, user_id, username, display_name, is_bot, status FROM members
                 WHERE chat_id = ?1 AND status = 'member' AND is_bot = 0 ORDER BY user_id",
            )?;
            let rows = stmt.query_map(params![chat_id], Member::from_row)?;
            rows.collect()
        })
        .await
    }
}
