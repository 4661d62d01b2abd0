//! SQLite-backed stores
//!
//! Durable variants of the state and session history stores. Each store
//! opens its own connection pool on `start` and closes it on `stop`; both
//! may share one database file.

use super::{AgentState, ServiceError, SessionHistoryService, StateService};
use crate::chat::{Message, MessageRole, ToolCall};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

const MIGRATION_SQL: &str = include_str!("../../migrations/001_create_sessions.sql");

/// Open a pool on `db_path` and apply the schema
async fn connect(db_path: &Path) -> Result<SqlitePool, ServiceError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let connection_string = format!("sqlite:{}", db_path.display());
    let options = SqliteConnectOptions::from_str(&connection_string)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("Connected to SQLite database at: {}", db_path.display());
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run the schema statements one by one
async fn run_migrations(pool: &SqlitePool) -> Result<(), ServiceError> {
    // Remove comments (everything after --) and normalize whitespace
    let mut cleaned_sql = String::new();
    for line in MIGRATION_SQL.lines() {
        let line = match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        };
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            cleaned_sql.push_str(trimmed);
            cleaned_sql.push(' ');
        }
    }

    for statement in cleaned_sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }

    debug!("Database migrations completed");
    Ok(())
}

/// Lazily opened pool shared by the two store types
struct PoolSlot {
    db_path: PathBuf,
    name: &'static str,
    pool: RwLock<Option<SqlitePool>>,
}

impl PoolSlot {
    fn new(db_path: PathBuf, name: &'static str) -> Self {
        Self {
            db_path,
            name,
            pool: RwLock::new(None),
        }
    }

    async fn open(&self) -> Result<(), ServiceError> {
        let mut slot = self.pool.write().await;
        if slot.is_none() {
            *slot = Some(connect(&self.db_path).await?);
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }

    /// Clone of the pool handle; errors when the store is not started
    async fn get(&self) -> Result<SqlitePool, ServiceError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(ServiceError::NotStarted(self.name))
    }
}

/// SQLite agent state store
pub struct SqliteStateService {
    slot: PoolSlot,
}

impl SqliteStateService {
    /// Create a stopped store backed by `db_path`
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            slot: PoolSlot::new(db_path.into(), "state service"),
        }
    }
}

#[async_trait]
impl StateService for SqliteStateService {
    async fn start(&self) -> Result<(), ServiceError> {
        self.slot.open().await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.slot.close().await;
        Ok(())
    }

    async fn export_state(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<AgentState>, ServiceError> {
        let pool = self.slot.get().await?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state FROM agent_states WHERE user_id = ? AND session_id = ?")
                .bind(user_id)
                .bind(session_id)
                .fetch_optional(&pool)
                .await?;

        match row {
            Some((raw,)) => Ok(Some(AgentState(serde_json::from_str(&raw)?))),
            None => Ok(None),
        }
    }

    async fn save_state(
        &self,
        user_id: &str,
        session_id: &str,
        state: AgentState,
    ) -> Result<(), ServiceError> {
        let pool = self.slot.get().await?;
        let raw = serde_json::to_string(&state)?;
        sqlx::query(
            "INSERT INTO agent_states (user_id, session_id, state, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (user_id, session_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(raw)
        .bind(chrono::Utc::now().timestamp())
        .execute(&pool)
        .await?;

        debug!(user_id = %user_id, session_id = %session_id, "Saved agent state");
        Ok(())
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: String,
    role: String,
    name: String,
    content: String,
    tool_calls: String,
    tool_call_id: Option<String>,
    created_at: i64,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, ServiceError> {
        let tool_calls: Vec<ToolCall> = serde_json::from_str(&self.tool_calls)?;
        Ok(Message {
            id: self.id,
            name: self.name,
            role: MessageRole::from(self.role.as_str()),
            content: self.content,
            tool_calls,
            tool_call_id: self.tool_call_id,
            created_at: self.created_at,
        })
    }
}

/// SQLite session history store
pub struct SqliteSessionHistoryService {
    slot: PoolSlot,
}

impl SqliteSessionHistoryService {
    /// Create a stopped store backed by `db_path`
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            slot: PoolSlot::new(db_path.into(), "session history service"),
        }
    }
}

#[async_trait]
impl SessionHistoryService for SqliteSessionHistoryService {
    async fn start(&self) -> Result<(), ServiceError> {
        self.slot.open().await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.slot.close().await;
        Ok(())
    }

    async fn append_messages(
        &self,
        user_id: &str,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), ServiceError> {
        let pool = self.slot.get().await?;
        let mut tx = pool.begin().await?;
        for message in messages {
            sqlx::query(
                "INSERT INTO session_messages (id, user_id, session_id, role, name, content, tool_calls, tool_call_id, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&message.id)
            .bind(user_id)
            .bind(session_id)
            .bind(message.role.as_str())
            .bind(&message.name)
            .bind(&message.content)
            .bind(serde_json::to_string(&message.tool_calls)?)
            .bind(&message.tool_call_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(
            user_id = %user_id,
            session_id = %session_id,
            count = messages.len(),
            "Appended session messages"
        );
        Ok(())
    }

    async fn get_messages(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Message>, ServiceError> {
        let pool = self.slot.get().await?;
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, role, name, content, tool_calls, tool_call_id, created_at FROM session_messages \
             WHERE user_id = ? AND session_id = ? ORDER BY seq ASC",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_all(&pool)
        .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        let pool = self.slot.get().await?;
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT session_id FROM session_messages WHERE user_id = ? ORDER BY session_id",
        )
        .bind(user_id)
        .fetch_all(&pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
