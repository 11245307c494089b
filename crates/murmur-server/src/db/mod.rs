//! Database module for Murmur Server
//!
//! A libSQL store backing the hub's collaborators:
//! - **users**: profiles shown on group messages
//! - **group_members**: group membership in join order
//! - **messages**: persisted chat history
//!
//! A single connection is shared behind a mutex so in-memory databases keep
//! their contents across calls.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database};
use murmur_hub::{BackendError, Envelope, GroupMembership, PersistenceSink, Profile, ProfileLookup};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

const IN_MEMORY: &str = ":memory:";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        nickname TEXT NOT NULL DEFAULT '',
        avatar TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_members (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id TEXT NOT NULL,
        username TEXT NOT NULL,
        UNIQUE (group_id, username)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_user TEXT NOT NULL,
        to_user TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        content_type INTEGER NOT NULL,
        message_type INTEGER NOT NULL,
        url TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_to_user ON messages (to_user)",
];

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Internal database error: {0}")]
    Internal(#[from] libsql::Error),
}

impl From<DatabaseError> for BackendError {
    fn from(err: DatabaseError) -> Self {
        BackendError::storage(err.to_string())
    }
}

/// One stored row of chat history.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub from: String,
    pub to: String,
    pub content: String,
    pub content_type: i32,
    pub message_type: i32,
    pub url: String,
    pub created_at: String,
}

/// libSQL-backed users, groups and message history.
pub struct ChatStore {
    conn: Mutex<Connection>,
    _db: Database,
}

impl ChatStore {
    /// Open (or create) a database file; `None` opens an in-memory database.
    #[instrument(skip_all)]
    pub async fn open(path: Option<&Path>) -> Result<Self, DatabaseError> {
        let db = match path {
            Some(path) if path.as_os_str() != IN_MEMORY => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        DatabaseError::ConnectionFailed(format!(
                            "Failed to create database directory: {}",
                            e
                        ))
                    })?;
                }
                info!("Opening database at {}", path.display());
                libsql::Builder::new_local(path).build().await?
            }
            _ => {
                debug!("Creating in-memory database");
                libsql::Builder::new_local(IN_MEMORY).build().await?
            }
        };

        let conn = db.connect()?;
        Ok(Self {
            conn: Mutex::new(conn),
            _db: db,
        })
    }

    pub async fn in_memory() -> Result<Self, DatabaseError> {
        Self::open(None).await
    }

    /// Create any missing tables.
    #[instrument(skip_all)]
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        for statement in SCHEMA {
            conn.execute(statement, ()).await.map_err(|e| {
                DatabaseError::QueryFailed(format!("Failed to apply schema: {}", e))
            })?;
        }
        debug!("Schema up to date");
        Ok(())
    }

    /// Check the connection answers a trivial query.
    pub async fn health_check(&self) -> bool {
        let conn = self.conn.lock().await;
        match conn.query("SELECT 1", ()).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Database health check failed: {}", e);
                false
            }
        }
    }
}

// Users and groups are managed by the account service; these writers exist
// for tests only.
#[cfg(test)]
impl ChatStore {
    /// Insert or update a user's profile.
    #[instrument(skip(self, avatar))]
    pub async fn upsert_user(
        &self,
        username: &str,
        nickname: &str,
        avatar: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO users (username, nickname, avatar, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (username) DO UPDATE SET nickname = excluded.nickname, avatar = excluded.avatar
            "#,
            libsql::params![
                username.to_string(),
                nickname.to_string(),
                avatar.to_string(),
                Utc::now().to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }

    /// Add a member to a group; joining twice keeps the original position.
    #[instrument(skip(self))]
    pub async fn add_group_member(&self, group_id: &str, username: &str) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, username) VALUES (?1, ?2)",
            libsql::params![group_id.to_string(), username.to_string()],
        )
        .await?;
        Ok(())
    }

    /// Most recent messages addressed to `to`, oldest first.
    #[instrument(skip(self))]
    pub async fn messages_to(&self, to: &str, limit: u32) -> Result<Vec<StoredMessage>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                r#"
                SELECT from_user, to_user, content, content_type, message_type, url, created_at
                FROM (
                    SELECT * FROM messages WHERE to_user = ?1 ORDER BY id DESC LIMIT ?2
                )
                ORDER BY id ASC
                "#,
                libsql::params![to.to_string(), limit as i64],
            )
            .await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(StoredMessage {
                from: row.get(0)?,
                to: row.get(1)?,
                content: row.get(2)?,
                content_type: row.get::<i64>(3)? as i32,
                message_type: row.get::<i64>(4)? as i32,
                url: row.get(5)?,
                created_at: row.get(6)?,
            });
        }
        Ok(messages)
    }
}

#[async_trait]
impl GroupMembership for ChatStore {
    async fn list_members(&self, group_id: &str) -> Result<Vec<String>, BackendError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT username FROM group_members WHERE group_id = ?1 ORDER BY id",
                libsql::params![group_id.to_string()],
            )
            .await
            .map_err(DatabaseError::from)?;

        let mut members = Vec::new();
        while let Some(row) = rows.next().await.map_err(DatabaseError::from)? {
            members.push(row.get::<String>(0).map_err(DatabaseError::from)?);
        }
        Ok(members)
    }
}

#[async_trait]
impl ProfileLookup for ChatStore {
    async fn get(&self, identity: &str) -> Result<Option<Profile>, BackendError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT username, nickname, avatar FROM users WHERE username = ?1",
                libsql::params![identity.to_string()],
            )
            .await
            .map_err(DatabaseError::from)?;

        let Some(row) = rows.next().await.map_err(DatabaseError::from)? else {
            return Ok(None);
        };

        let username: String = row.get(0).map_err(DatabaseError::from)?;
        let nickname: String = row.get(1).map_err(DatabaseError::from)?;
        let avatar: String = row.get(2).map_err(DatabaseError::from)?;

        Ok(Some(Profile {
            display_name: if nickname.is_empty() { username } else { nickname },
            avatar,
        }))
    }
}

#[async_trait]
impl PersistenceSink for ChatStore {
    async fn save(&self, envelope: &Envelope) -> Result<(), BackendError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO messages (
                from_user, to_user, content, content_type, message_type, url, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            libsql::params![
                envelope.from.clone(),
                envelope.to.clone(),
                envelope.content.clone(),
                envelope.content_type as i64,
                envelope.message_type as i64,
                envelope.url.clone(),
                Utc::now().to_rfc3339()
            ],
        )
        .await
        .map_err(|e| DatabaseError::QueryFailed(format!("Failed to insert message: {}", e)))?;

        debug!(from = %envelope.from, to = %envelope.to, "Stored message");
        Ok(())
    }
}
