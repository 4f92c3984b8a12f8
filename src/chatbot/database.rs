//! Persistent SQLite store for chat history, settings, the blacklist and
//! captured group messages.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::chatbot::services::{
    BlacklistEntry, ChatHistoryEntry, ChatSettings, GroupMessage, Role, Store,
};
use crate::error::Result;

/// Captured group messages older than this many hours are dropped on the next insert.
pub const GROUP_MESSAGE_TTL_HOURS: i64 = 24;

/// SQLite-backed [`Store`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Self::from_connection(Connection::open(path)?)?;
        let (history, chats) = db.counts()?;
        info!("💾 Loaded database from {:?} ({} history rows, {} chats)", path, history, chats);
        Ok(db)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_settings (
                chat_id TEXT PRIMARY KEY,
                ai_enabled INTEGER NOT NULL DEFAULT 0,
                transcribe_mode INTEGER NOT NULL DEFAULT 0,
                preferred_model TEXT
            );

            CREATE TABLE IF NOT EXISTS blacklist (
                user_id TEXT PRIMARY KEY,
                reason TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_chat ON chat_history(chat_id, id);
            CREATE INDEX IF NOT EXISTS idx_group_chat ON group_messages(chat_id, id);
        "#)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn counts(&self) -> Result<(usize, usize)> {
        let conn = self.conn();
        let history: i64 = conn.query_row("SELECT COUNT(*) FROM chat_history", [], |row| row.get(0))?;
        let chats: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT chat_id) FROM chat_history", [], |row| row.get(0)
        )?;
        Ok((history as usize, chats as usize))
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[async_trait]
impl Store for Database {
    async fn append_history(&self, chat_id: &str, role: Role, content: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_history (chat_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, role.as_str(), content, now()],
        )?;
        Ok(())
    }

    async fn recent_history(&self, chat_id: &str, limit: usize) -> Result<Vec<ChatHistoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chat_id, role, content, created_at FROM chat_history
             WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2"
        )?;
        let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (chat_id, role, content, created_at) = row?;
            // Unknown roles can only come from a hand-edited file; skip them.
            let Some(role) = Role::parse(&role) else { continue };
            entries.push(ChatHistoryEntry { chat_id, role, content, created_at });
        }
        entries.reverse();
        Ok(entries)
    }

    async fn history_len(&self, chat_id: &str) -> Result<usize> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_history WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    async fn clear_history(&self, chat_id: &str) -> Result<()> {
        let n = self.conn().execute("DELETE FROM chat_history WHERE chat_id = ?1", params![chat_id])?;
        debug!("Cleared {n} history rows for {chat_id}");
        Ok(())
    }

    async fn add_group_message(&self, chat_id: &str, sender: &str, content: &str) -> Result<()> {
        let conn = self.conn();
        let cutoff = (Utc::now() - Duration::hours(GROUP_MESSAGE_TTL_HOURS)).to_rfc3339();
        let expired = conn.execute(
            "DELETE FROM group_messages WHERE chat_id = ?1 AND created_at < ?2",
            params![chat_id, cutoff],
        )?;
        if expired > 0 {
            debug!(chat_id, "Dropped {expired} expired group messages");
        }
        conn.execute(
            "INSERT INTO group_messages (chat_id, sender, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, sender, content, now()],
        )?;
        Ok(())
    }

    async fn group_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<GroupMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT sender, content, created_at FROM group_messages
             WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2"
        )?;
        let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
            Ok(GroupMessage {
                sender: row.get(0)?,
                content: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn clear_group_messages(&self, chat_id: &str) -> Result<()> {
        self.conn().execute("DELETE FROM group_messages WHERE chat_id = ?1", params![chat_id])?;
        Ok(())
    }

    async fn settings(&self, chat_id: &str) -> Result<ChatSettings> {
        let found = self.conn().query_row(
            "SELECT ai_enabled, transcribe_mode, preferred_model FROM chat_settings WHERE chat_id = ?1",
            params![chat_id],
            |row| {
                Ok(ChatSettings {
                    chat_id: chat_id.to_string(),
                    ai_enabled: row.get::<_, i64>(0)? != 0,
                    transcribe_mode: row.get::<_, i64>(1)? != 0,
                    preferred_model: row.get(2)?,
                })
            },
        ).optional()?;
        Ok(found.unwrap_or_else(|| ChatSettings::new(chat_id)))
    }

    async fn save_settings(&self, settings: &ChatSettings) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_settings (chat_id, ai_enabled, transcribe_mode, preferred_model)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET
                ai_enabled = excluded.ai_enabled,
                transcribe_mode = excluded.transcribe_mode,
                preferred_model = excluded.preferred_model",
            params![
                settings.chat_id,
                settings.ai_enabled as i64,
                settings.transcribe_mode as i64,
                settings.preferred_model,
            ],
        )?;
        Ok(())
    }

    async fn blacklist_add(&self, user_id: &str, reason: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO blacklist (user_id, reason, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET reason = excluded.reason",
            params![user_id, reason, now()],
        )?;
        Ok(())
    }

    async fn blacklist_remove(&self, user_id: &str) -> Result<bool> {
        let n = self.conn().execute("DELETE FROM blacklist WHERE user_id = ?1", params![user_id])?;
        Ok(n > 0)
    }

    async fn is_blacklisted(&self, user_id: &str) -> Result<bool> {
        let found: Option<i64> = self.conn().query_row(
            "SELECT 1 FROM blacklist WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        ).optional()?;
        Ok(found.is_some())
    }

    async fn blacklist(&self) -> Result<Vec<BlacklistEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT user_id, reason FROM blacklist ORDER BY created_at, user_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(BlacklistEntry { user_id: row.get(0)?, reason: row.get(1)? })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn health(&self) -> Result<String> {
        let one: i64 = self.conn().query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(format!("sqlite ok ({one})"))
    }
}
