//! Storage collaborator
//!
//! Users, groups, sessions and chat history live in the relational store owned
//! by the rest of the backend. This module only defines the narrow set of
//! queries the realtime layer needs, plus a rusqlite implementation.
//!
//! Store calls are blocking. Async callers go through [`blocking`], which runs
//! them on tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::info;

use agora_protocol::{GroupId, UserId};

/// A login session as stored by the auth handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    /// Hash of the client that created the session, if it was recorded
    pub fingerprint: Option<String>,
}

/// Display fields for a user. Empty strings stand for "not set".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

pub trait Store: Send + Sync + 'static {
    fn resolve_session(&self, token: &str) -> anyhow::Result<Option<SessionRecord>>;

    fn delete_session(&self, token: &str) -> anyhow::Result<()>;

    /// Profiles for the given users in one read. Unknown ids are omitted.
    fn profiles(&self, user_ids: &[UserId]) -> anyhow::Result<Vec<Profile>>;

    fn profile(&self, user_id: UserId) -> anyhow::Result<Option<Profile>>;

    fn group_member_ids(&self, group_id: GroupId) -> anyhow::Result<Vec<UserId>>;

    fn persist_group_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        content: &str,
    ) -> anyhow::Result<PersistedMessage>;
}

pub type SharedStore = Arc<dyn Store>;

/// Run a store call on the blocking pool.
pub async fn blocking<T, F>(store: &SharedStore, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Store) -> anyhow::Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref())).await?
}

/// SQLite-backed store over the backend's existing schema
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database file. The schema is created by the backend's
    /// migration step, not here.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        info!(
            component = "store",
            event = "store.opened",
            path = %path.display(),
            "SQLite store opened"
        );
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn profile_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        user_id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        nickname: row.get(3)?,
        avatar: row.get(4)?,
    })
}

const PROFILE_COLUMNS: &str =
    "id, first_name, last_name, COALESCE(nickname, ''), COALESCE(avatar, '')";

impl Store for SqliteStore {
    fn resolve_session(&self, token: &str) -> anyhow::Result<Option<SessionRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT user_id, expires_at, browser_fingerprint
                 FROM sessions
                 WHERE id = ?1",
                params![token],
                |row| {
                    Ok(SessionRecord {
                        user_id: row.get(0)?,
                        expires_at: row.get(1)?,
                        fingerprint: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn delete_session(&self, token: &str) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![token])?;
        Ok(())
    }

    fn profiles(&self, user_ids: &[UserId]) -> anyhow::Result<Vec<Profile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM users WHERE id IN ({placeholders})");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let profiles = stmt
            .query_map(params_from_iter(user_ids.iter()), profile_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    fn profile(&self, user_id: UserId) -> anyhow::Result<Option<Profile>> {
        let conn = self.conn();
        let profile = conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    fn group_member_ids(&self, group_id: GroupId) -> anyhow::Result<Vec<UserId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id FROM group_members
             WHERE group_id = ?1
             ORDER BY joined_at ASC",
        )?;
        let ids = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<Result<Vec<UserId>, _>>()?;
        Ok(ids)
    }

    fn persist_group_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        content: &str,
    ) -> anyhow::Result<PersistedMessage> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO group_chat_messages (group_id, user_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![group_id, user_id, content, created_at],
        )?;
        Ok(PersistedMessage {
            id: conn.last_insert_rowid(),
            created_at,
        })
    }
}
