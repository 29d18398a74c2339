use std::path::Path;
use std::sync::Mutex;

use chrono::SecondsFormat;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use ahrian_core::error::{AhrianError, Result};
use ahrian_core::traits::ConversationStore;
use ahrian_core::types::{Conversation, ConversationId};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS conversations (
        namespace TEXT NOT NULL,
        id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (namespace, id)
    );

    CREATE INDEX IF NOT EXISTS idx_conversations_created
        ON conversations(namespace, created_at);";

/// SQLite-backed conversation store.
///
/// Each conversation is one JSON row keyed by `(namespace, id)`, so several
/// namespaces can share a database file without seeing each other's rows.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
    namespace: String,
}

impl SqliteConversationStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path, namespace: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AhrianError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| AhrianError::Database(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| AhrianError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| AhrianError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Conversation store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.into(),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(namespace: impl Into<String>) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| AhrianError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| AhrianError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.into(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl ConversationStore for SqliteConversationStore {
    fn save(&self, conversation: &Conversation) -> BoxFuture<'_, Result<()>> {
        let id = conversation.id.to_string();
        let created_at = conversation
            .created_at
            .to_rfc3339_opts(SecondsFormat::Nanos, true);
        let body = serde_json::to_string(conversation);

        Box::pin(async move {
            let body = body?;
            let conn = self
                .conn
                .lock()
                .map_err(|e| AhrianError::Database(e.to_string()))?;

            conn.execute(
                "INSERT INTO conversations (namespace, id, created_at, body)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(namespace, id) DO UPDATE SET body = excluded.body",
                params![self.namespace, id, created_at, body],
            )
            .map_err(|e| AhrianError::Database(e.to_string()))?;

            Ok(())
        })
    }

    fn load_all(&self) -> BoxFuture<'_, Result<Vec<Conversation>>> {
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| AhrianError::Database(e.to_string()))?;

            let mut stmt = conn
                .prepare(
                    "SELECT id, body FROM conversations
                     WHERE namespace = ?1
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(|e| AhrianError::Database(e.to_string()))?;

            let rows = stmt
                .query_map(params![self.namespace], |row| {
                    let id: String = row.get(0)?;
                    let body: String = row.get(1)?;
                    Ok((id, body))
                })
                .map_err(|e| AhrianError::Database(e.to_string()))?;

            let mut conversations = Vec::new();
            for row in rows {
                let (id, body) = row.map_err(|e| AhrianError::Database(e.to_string()))?;
                // A row that no longer parses is skipped rather than hiding the rest.
                match serde_json::from_str::<Conversation>(&body) {
                    Ok(conversation) => conversations.push(conversation),
                    Err(e) => warn!(conversation_id = %id, error = %e, "Skipping unreadable conversation"),
                }
            }

            Ok(conversations)
        })
    }

    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<Conversation>>> {
        let id = id.to_string();

        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| AhrianError::Database(e.to_string()))?;

            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM conversations WHERE namespace = ?1 AND id = ?2",
                    params![self.namespace, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| AhrianError::Database(e.to_string()))?;

            match body {
                Some(body) => Ok(Some(serde_json::from_str(&body)?)),
                None => Ok(None),
            }
        })
    }

    fn delete(&self, id: &ConversationId) -> BoxFuture<'_, Result<bool>> {
        let id = id.to_string();

        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| AhrianError::Database(e.to_string()))?;

            let removed = conn
                .execute(
                    "DELETE FROM conversations WHERE namespace = ?1 AND id = ?2",
                    params![self.namespace, id],
                )
                .map_err(|e| AhrianError::Database(e.to_string()))?;

            Ok(removed > 0)
        })
    }
}
