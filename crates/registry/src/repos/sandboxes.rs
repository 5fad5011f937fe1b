//! Sandbox repository.

use crate::error::RegistryResult;
use crate::models::SandboxRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for sandbox records.
#[async_trait]
pub trait SandboxRepo: Send + Sync {
    /// Record a sandbox. Fails with `AlreadyExists` if the container id is
    /// already bound to another sandbox.
    async fn create_sandbox(&self, sandbox: &SandboxRow) -> RegistryResult<()>;

    /// Get a sandbox by id.
    async fn get_sandbox(&self, sandbox_id: Uuid) -> RegistryResult<Option<SandboxRow>>;

    /// List sandboxes owned by a user, newest first.
    async fn list_sandboxes_for_user(&self, user_id: Uuid) -> RegistryResult<Vec<SandboxRow>>;

    /// List every sandbox. Used by the reaper to snapshot the registry.
    async fn list_all_sandboxes(&self) -> RegistryResult<Vec<SandboxRow>>;

    /// Count sandboxes owned by a user.
    async fn count_sandboxes_for_user(&self, user_id: Uuid) -> RegistryResult<u64>;

    /// Delete a sandbox row. Fails with `NotFound` if the row is absent.
    async fn delete_sandbox(&self, sandbox_id: Uuid) -> RegistryResult<()>;

    /// Set a sandbox's last-used time.
    async fn touch_sandbox(&self, sandbox_id: Uuid, used_at: OffsetDateTime) -> RegistryResult<()>;
}
