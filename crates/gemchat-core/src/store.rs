use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::StorageError;
use crate::state::ChatTurn;

/// Key under which the whole conversation is stored
pub const MESSAGES_KEY: &str = "messages";

/// File-backed key-value store holding the conversation history.
///
/// Every call opens the SQLite file, does its work and closes it again, so no
/// lock is held between calls. Writes replace the whole `messages` value in a
/// single transaction; the last successful save wins.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    path: PathBuf,
}

impl ConversationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `<data dir>/gemchat/chat_history.db`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("gemchat").join("chat_history.db"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved conversation, or an empty one if nothing was saved yet.
    pub fn load(&self) -> Result<Vec<ChatTurn>, StorageError> {
        let conn = self.open()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![MESSAGES_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let history = match value {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        debug!(path = ?self.path, turns = history.len(), "loaded conversation");
        Ok(history)
    }

    /// Replace the saved conversation with `history`.
    pub fn save(&self, history: &[ChatTurn]) -> Result<(), StorageError> {
        let json = serde_json::to_string(history)?;
        let mut conn = self.open()?;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![MESSAGES_KEY, json],
        )?;
        tx.commit()?;

        debug!(path = ?self.path, turns = history.len(), "saved conversation");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.save(&[])
    }

    fn open(&self) -> Result<Connection, StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(&self.path).map_err(|source| StorageError::Open {
            path: self.path.clone(),
            source,
        })?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)",
            [],
        )?;
        Ok(conn)
    }
}
