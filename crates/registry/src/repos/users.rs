//! User repository.

use crate::error::RegistryResult;
use crate::models::UserRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for user records.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a user. Fails with `AlreadyExists` on a duplicate username or
    /// email (compared case-insensitively).
    async fn create_user(&self, user: &UserRow) -> RegistryResult<()>;

    /// Get a user by id.
    async fn get_user(&self, user_id: Uuid) -> RegistryResult<Option<UserRow>>;

    /// Get a user by username (case-insensitive).
    async fn get_user_by_username(&self, username: &str) -> RegistryResult<Option<UserRow>>;

    /// Get a user by email (case-insensitive).
    async fn get_user_by_email(&self, email: &str) -> RegistryResult<Option<UserRow>>;

    /// Get a user by API key (exact match).
    async fn get_user_by_api_key(&self, api_key: &str) -> RegistryResult<Option<UserRow>>;

    /// Atomically replace a user's API key.
    async fn update_api_key(&self, user_id: Uuid, api_key: &str) -> RegistryResult<()>;
}
