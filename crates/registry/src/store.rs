//! Registry store trait and SQLite implementation.

use crate::error::{RegistryError, RegistryResult};
use crate::models::{SandboxRow, UserRow};
use crate::repos::{SandboxRepo, UserRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Combined registry store trait.
#[async_trait]
pub trait RegistryStore: UserRepo + SandboxRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> RegistryResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> RegistryResult<()>;
}

/// SQLite-backed registry store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, creating the database file and schema if
    /// they do not exist yet.
    pub async fn new(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under load.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn migrate(&self) -> RegistryResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> RegistryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map an insert error to `AlreadyExists` when a unique index was violated.
fn map_unique_violation(e: sqlx::Error, what: &str) -> RegistryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RegistryError::AlreadyExists(what.to_string());
        }
    }
    RegistryError::Database(e)
}

#[async_trait]
impl UserRepo for SqliteStore {
    async fn create_user(&self, user: &UserRow) -> RegistryResult<()> {
        if self.get_user_by_username(&user.username).await?.is_some() {
            return Err(RegistryError::AlreadyExists(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        if self.get_user_by_email(&user.email).await?.is_some() {
            return Err(RegistryError::AlreadyExists(format!(
                "email '{}' already exists",
                user.email
            )));
        }

        sqlx::query(
            "INSERT INTO users (user_id, username, email, password_hash, api_key, created_at, is_active) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.api_key)
        .bind(user.created_at)
        .bind(user.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "user"))?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> RegistryResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_user_by_username(&self, username: &str) -> RegistryResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_user_by_email(&self, email: &str) -> RegistryResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_user_by_api_key(&self, api_key: &str) -> RegistryResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update_api_key(&self, user_id: Uuid, api_key: &str) -> RegistryResult<()> {
        let result = sqlx::query("UPDATE users SET api_key = ? WHERE user_id = ?")
            .bind(api_key)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(format!(
                "user_id {user_id} not found"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxRepo for SqliteStore {
    async fn create_sandbox(&self, sandbox: &SandboxRow) -> RegistryResult<()> {
        sqlx::query(
            "INSERT INTO sandboxes (sandbox_id, user_id, name, container_id, created_at, last_used_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(sandbox.sandbox_id)
        .bind(sandbox.user_id)
        .bind(&sandbox.name)
        .bind(&sandbox.container_id)
        .bind(sandbox.created_at)
        .bind(sandbox.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "sandbox"))?;
        Ok(())
    }

    async fn get_sandbox(&self, sandbox_id: Uuid) -> RegistryResult<Option<SandboxRow>> {
        let row = sqlx::query_as::<_, SandboxRow>("SELECT * FROM sandboxes WHERE sandbox_id = ?")
            .bind(sandbox_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_sandboxes_for_user(&self, user_id: Uuid) -> RegistryResult<Vec<SandboxRow>> {
        let rows = sqlx::query_as::<_, SandboxRow>(
            "SELECT * FROM sandboxes WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_all_sandboxes(&self) -> RegistryResult<Vec<SandboxRow>> {
        let rows = sqlx::query_as::<_, SandboxRow>("SELECT * FROM sandboxes ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count_sandboxes_for_user(&self, user_id: Uuid) -> RegistryResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sandboxes WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn delete_sandbox(&self, sandbox_id: Uuid) -> RegistryResult<()> {
        let result = sqlx::query("DELETE FROM sandboxes WHERE sandbox_id = ?")
            .bind(sandbox_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(format!(
                "sandbox_id {sandbox_id} not found"
            )));
        }
        Ok(())
    }

    async fn touch_sandbox(&self, sandbox_id: Uuid, used_at: OffsetDateTime) -> RegistryResult<()> {
        let result = sqlx::query("UPDATE sandboxes SET last_used_at = ? WHERE sandbox_id = ?")
            .bind(used_at)
            .bind(sandbox_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(format!(
                "sandbox_id {sandbox_id} not found"
            )));
        }
        Ok(())
    }
}

const SCHEMA_SQL: &str = r#"
-- Users
CREATE TABLE IF NOT EXISTS users (
    user_id BLOB PRIMARY KEY,
    username TEXT NOT NULL COLLATE NOCASE,
    email TEXT NOT NULL COLLATE NOCASE,
    password_hash TEXT NOT NULL,
    api_key TEXT NOT NULL,
    created_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username ON users(username);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_api_key ON users(api_key);

-- Sandboxes
CREATE TABLE IF NOT EXISTS sandboxes (
    sandbox_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id),
    name TEXT NOT NULL,
    container_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_used_at TEXT NOT NULL
);
-- No two sandboxes may share a container.
CREATE UNIQUE INDEX IF NOT EXISTS idx_sandboxes_container ON sandboxes(container_id);
CREATE INDEX IF NOT EXISTS idx_sandboxes_user ON sandboxes(user_id);
"#;
