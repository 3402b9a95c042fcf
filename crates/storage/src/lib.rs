use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::UserId;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Durable form of one user's session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSession {
    pub user_id: UserId,
    pub busy: bool,
    pub last_elapsed_secs: Option<f64>,
    pub last_command: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            busy: false,
            last_elapsed_secs: None,
            last_command: None,
            updated_at: Utc::now(),
        }
    }

    fn from_row(row: &SqliteRow) -> Self {
        Self {
            user_id: UserId(row.get::<i64, _>(0)),
            busy: row.get::<bool, _>(1),
            last_elapsed_secs: row.get::<Option<f64>, _>(2),
            last_command: row.get::<Option<String>, _>(3),
            updated_at: row.get::<DateTime<Utc>, _>(4),
        }
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open session database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn load_sessions(&self) -> Result<Vec<StoredSession>> {
        let rows = sqlx::query(
            "SELECT user_id, busy, last_elapsed_secs, last_command, updated_at
             FROM user_sessions
             ORDER BY user_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load user sessions")?;
        Ok(rows.iter().map(StoredSession::from_row).collect())
    }

    pub async fn load_session(&self, user_id: UserId) -> Result<Option<StoredSession>> {
        let row = sqlx::query(
            "SELECT user_id, busy, last_elapsed_secs, last_command, updated_at
             FROM user_sessions
             WHERE user_id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(StoredSession::from_row))
    }

    pub async fn upsert_session(&self, session: &StoredSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_sessions (user_id, busy, last_elapsed_secs, last_command, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                busy = excluded.busy,
                last_elapsed_secs = excluded.last_elapsed_secs,
                last_command = excluded.last_command,
                updated_at = excluded.updated_at",
        )
        .bind(session.user_id.0)
        .bind(session.busy)
        .bind(session.last_elapsed_secs)
        .bind(session.last_command.as_deref())
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to persist session for user {}", session.user_id))?;
        Ok(())
    }

    /// Clears every busy flag and returns how many rows were affected.
    pub async fn clear_busy_flags(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE user_sessions SET busy = 0, updated_at = ? WHERE busy = 1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .context("failed to clear busy flags")?;
        Ok(result.rows_affected())
    }

    /// Forgets the render history of one user. Returns false for unknown users.
    pub async fn reset_session(&self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_sessions
             SET busy = 0, last_elapsed_secs = NULL, last_command = NULL, updated_at = ?
             WHERE user_id = ?",
        )
        .bind(Utc::now())
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
