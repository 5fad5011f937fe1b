//! Container runtime capability surface.
//!
//! Everything container-specific lives behind [`ContainerDriver`]; no other
//! crate in the workspace names the runtime. The production implementation
//! is [`DockerDriver`] over the Docker Engine API; [`testing::FakeDriver`]
//! is an in-memory stand-in for tests.

pub mod docker;
pub mod error;
pub mod testing;

pub use docker::DockerDriver;
pub use error::{DriverError, DriverResult};

use async_trait::async_trait;
use std::time::Duration;

/// Captured output of a single exec.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// One file inside a container directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Path relative to the listed directory.
    pub name: String,
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
}

/// Capability surface over the host container runtime.
///
/// Calls are synchronous from the caller's view and may each take seconds;
/// every method is a suspension point.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Create a container from the configured base image and start it with a
    /// no-op foreground command so it stays alive. Returns the runtime's
    /// container id.
    async fn create_and_start(&self, name: &str) -> DriverResult<String>;

    /// Run `argv` inside the container, capturing both streams (capped at
    /// 1 MiB each). On wall-clock expiry the exec process is killed inside
    /// the container and the call fails with [`DriverError::ExecTimeout`];
    /// the container stays alive.
    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        timeout: Duration,
    ) -> DriverResult<ExecOutput>;

    /// Place `contents` at `{dest_dir}/{file_name}` inside the container.
    async fn copy_into(
        &self,
        container_id: &str,
        dest_dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> DriverResult<()>;

    /// Read a file out of the container.
    async fn copy_out(&self, container_id: &str, path: &str) -> DriverResult<Vec<u8>>;

    /// List regular files under `dir`, recursively, with paths relative to
    /// `dir`. A missing directory lists as empty.
    async fn list_dir(&self, container_id: &str, dir: &str) -> DriverResult<Vec<DirEntry>>;

    /// Whether the runtime can still address this container.
    async fn exists(&self, container_id: &str) -> DriverResult<bool>;

    /// Force-remove the container. Removing a container the runtime no
    /// longer knows is success.
    async fn remove(&self, container_id: &str) -> DriverResult<()>;
}
