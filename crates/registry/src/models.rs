//! Database models mapping to the registry schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    /// Opaque full-entropy key; stored plaintext so it can be re-read by its
    /// owner (the REST surface returns the current key).
    pub api_key: String,
    pub created_at: OffsetDateTime,
    pub is_active: bool,
}

/// Sandbox record binding a logical sandbox to its container.
#[derive(Debug, Clone, FromRow)]
pub struct SandboxRow {
    pub sandbox_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Runtime handle for the backing container. Unique across rows.
    pub container_id: String,
    pub created_at: OffsetDateTime,
    pub last_used_at: OffsetDateTime,
}
