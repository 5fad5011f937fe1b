//! Execution coordinator.
//!
//! Provides the high-level sandbox operations, enforces per-sandbox
//! serialization, publishes result files, and keeps the registry's
//! last-used clocks current. All collaborators are constructor-injected so
//! tests can substitute them.

use crate::error::{EngineError, EngineResult};
use crate::install::{BeginInstall, InstallState, InstallTable};
use crate::locks::SandboxLocks;
use cinderbox_core::config::ContainerConfig;
use cinderbox_core::{RESULTS_DIR, SCRIPT_PATH};
use cinderbox_driver::{ContainerDriver, DirEntry};
use cinderbox_publisher::{FilePublisher, PublishError};
use cinderbox_registry::{RegistryError, RegistryStore, SandboxRow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wall-clock allowance for a package-manager run. Installs routinely
/// outlive the code-execution timeout, so they get their own.
const INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Result of `execute_code`. A non-zero interpreter exit is still a
/// successful execution; the exception text lives in stderr.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub file_links: Vec<String>,
}

/// Result of `execute_terminal`.
#[derive(Debug, Clone)]
pub struct TerminalResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Result of an `install_package` prologue.
#[derive(Debug, Clone)]
pub struct InstallStart {
    /// `"installing"` or `"already_installed"`.
    pub status: &'static str,
    pub record_id: Uuid,
}

/// The sandbox execution coordinator.
pub struct Coordinator {
    config: ContainerConfig,
    registry: Arc<dyn RegistryStore>,
    driver: Arc<dyn ContainerDriver>,
    publisher: Arc<FilePublisher>,
    locks: SandboxLocks,
    installs: Arc<InstallTable>,
}

impl Coordinator {
    pub fn new(
        config: ContainerConfig,
        registry: Arc<dyn RegistryStore>,
        driver: Arc<dyn ContainerDriver>,
        publisher: Arc<FilePublisher>,
    ) -> Self {
        Self {
            config,
            registry,
            driver,
            publisher,
            locks: SandboxLocks::new(),
            installs: Arc::new(InstallTable::new()),
        }
    }

    /// Lock map, exposed for tests.
    pub fn locks(&self) -> &SandboxLocks {
        &self.locks
    }

    /// Fetch a sandbox and verify ownership. A sandbox that exists but
    /// belongs to someone else reports `not_found`, so ids cannot be used
    /// to probe for other users' sandboxes.
    async fn authorized_sandbox(
        &self,
        user_id: Uuid,
        sandbox_id: Uuid,
    ) -> EngineResult<SandboxRow> {
        let sandbox = self
            .registry
            .get_sandbox(sandbox_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("sandbox {sandbox_id} not found")))?;
        if sandbox.user_id != user_id {
            return Err(EngineError::NotFound(format!(
                "sandbox {sandbox_id} not found"
            )));
        }
        Ok(sandbox)
    }

    async fn touch(&self, sandbox_id: Uuid) {
        if let Err(e) = self
            .registry
            .touch_sandbox(sandbox_id, OffsetDateTime::now_utc())
            .await
        {
            warn!(sandbox_id = %sandbox_id, error = %e, "failed to update last-used time");
        }
    }

    /// Create a sandbox: start a container, prepare its results directory,
    /// and record the binding. If the record cannot be written the
    /// container is removed before the error returns, so no container
    /// outlives a failed create.
    pub async fn create_sandbox(
        &self,
        user_id: Uuid,
        name: Option<String>,
    ) -> EngineResult<SandboxRow> {
        let existing = self.registry.count_sandboxes_for_user(user_id).await?;
        if existing >= u64::from(self.config.max_sandboxes_per_user) {
            return Err(EngineError::Conflict(format!(
                "sandbox limit of {} reached; delete one first",
                self.config.max_sandboxes_per_user
            )));
        }

        let sandbox_id = Uuid::new_v4();
        let container_name = format!("cinderbox-{}", &sandbox_id.simple().to_string()[..8]);
        let container_id = self.driver.create_and_start(&container_name).await?;

        let prepared: EngineResult<SandboxRow> = async {
            let mkdir = vec![
                "mkdir".to_string(),
                "-p".to_string(),
                RESULTS_DIR.to_string(),
            ];
            self.driver
                .exec(&container_id, &mkdir, self.config.exec_timeout())
                .await?;

            let now = OffsetDateTime::now_utc();
            let row = SandboxRow {
                sandbox_id,
                user_id,
                name: name.unwrap_or_else(|| format!("Sandbox {}", existing + 1)),
                container_id: container_id.clone(),
                created_at: now,
                last_used_at: now,
            };
            self.registry.create_sandbox(&row).await?;
            Ok(row)
        }
        .await;

        match prepared {
            Ok(row) => {
                info!(sandbox_id = %sandbox_id, container_id = %row.container_id, "sandbox created");
                Ok(row)
            }
            Err(e) => {
                if let Err(cleanup) = self.driver.remove(&container_id).await {
                    warn!(container_id = %container_id, error = %cleanup,
                        "failed to remove container after aborted create");
                }
                Err(e)
            }
        }
    }

    /// List the caller's sandboxes. Pure read.
    pub async fn list_sandboxes(&self, user_id: Uuid) -> EngineResult<Vec<SandboxRow>> {
        Ok(self.registry.list_sandboxes_for_user(user_id).await?)
    }

    /// Delete a sandbox the caller owns: container, registry row, install
    /// records, published files, and lock entry.
    pub async fn delete_sandbox(&self, user_id: Uuid, sandbox_id: Uuid) -> EngineResult<()> {
        self.authorized_sandbox(user_id, sandbox_id).await?;
        self.teardown(sandbox_id).await
    }

    /// Tear a sandbox down without an ownership check. The reaper's entry
    /// point; also the tail of `delete_sandbox`.
    pub(crate) async fn teardown(&self, sandbox_id: Uuid) -> EngineResult<()> {
        let _guard = self.locks.acquire(sandbox_id).await;

        let Some(sandbox) = self.registry.get_sandbox(sandbox_id).await? else {
            // Raced with another teardown; nothing left to do.
            return Ok(());
        };

        self.driver.remove(&sandbox.container_id).await?;

        match self.registry.delete_sandbox(sandbox_id).await {
            Ok(()) | Err(RegistryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.installs.drop_sandbox(sandbox_id);
        self.publisher.forget(sandbox_id).await?;
        self.locks.discard(sandbox_id);

        info!(sandbox_id = %sandbox_id, container_id = %sandbox.container_id, "sandbox deleted");
        Ok(())
    }

    /// Run Python source in a sandbox and publish whatever new files it
    /// left in the results directory.
    pub async fn execute_code(
        &self,
        user_id: Uuid,
        sandbox_id: Uuid,
        code: &str,
    ) -> EngineResult<ExecutionResult> {
        let _guard = self.locks.acquire(sandbox_id).await;
        let sandbox = self.authorized_sandbox(user_id, sandbox_id).await?;
        let container_id = &sandbox.container_id;

        let baseline = self.driver.list_dir(container_id, RESULTS_DIR).await?;

        let (script_dir, script_name) = split_script_path();
        self.driver
            .copy_into(container_id, script_dir, script_name, code.as_bytes())
            .await?;

        let argv = vec!["python".to_string(), SCRIPT_PATH.to_string()];
        let output = self
            .driver
            .exec(container_id, &argv, self.config.exec_timeout())
            .await?;

        let after = self.driver.list_dir(container_id, RESULTS_DIR).await?;
        let produced = diff_entries(&baseline, &after);

        let mut file_links = Vec::with_capacity(produced.len());
        for entry in produced {
            match self.publish_artifact(sandbox_id, container_id, &entry).await {
                Ok(url) => file_links.push(url),
                // A hostile or odd artifact name must not fail the run; the
                // artifact is simply omitted.
                Err(EngineError::InvalidArgument(msg)) => {
                    warn!(sandbox_id = %sandbox_id, artifact = %entry.name, %msg,
                        "refused to publish artifact");
                }
                Err(EngineError::NotFound(_)) => {
                    debug!(sandbox_id = %sandbox_id, artifact = %entry.name,
                        "artifact vanished before extraction");
                }
                Err(e) => return Err(e),
            }
        }

        self.touch(sandbox_id).await;

        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            file_links,
        })
    }

    async fn publish_artifact(
        &self,
        sandbox_id: Uuid,
        container_id: &str,
        entry: &DirEntry,
    ) -> EngineResult<String> {
        let container_path = format!("{}/{}", RESULTS_DIR, entry.name);
        let bytes = self.driver.copy_out(container_id, &container_path).await?;
        let url = self.publisher.publish(sandbox_id, &entry.name, &bytes).await?;
        Ok(url)
    }

    /// Run a shell command in a sandbox. The exit code is data, not an
    /// error; only a wall-clock expiry fails the call.
    pub async fn execute_terminal(
        &self,
        user_id: Uuid,
        sandbox_id: Uuid,
        command: &str,
    ) -> EngineResult<TerminalResult> {
        let _guard = self.locks.acquire(sandbox_id).await;
        let sandbox = self.authorized_sandbox(user_id, sandbox_id).await?;

        let argv = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
        let output = self
            .driver
            .exec(&sandbox.container_id, &argv, self.config.exec_timeout())
            .await?;

        self.touch(sandbox_id).await;

        Ok(TerminalResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    }

    /// Start (or join) a package installation. Returns immediately; the
    /// install itself runs in a background task that holds no sandbox lock
    /// while the package manager executes.
    pub async fn install_package(
        &self,
        user_id: Uuid,
        sandbox_id: Uuid,
        package: &str,
    ) -> EngineResult<InstallStart> {
        validate_package_name(package)?;

        let _guard = self.locks.acquire(sandbox_id).await;
        let sandbox = self.authorized_sandbox(user_id, sandbox_id).await?;

        let record = match self
            .installs
            .begin(sandbox_id, package, OffsetDateTime::now_utc())
        {
            BeginInstall::Joined(record) => {
                debug!(sandbox_id = %sandbox_id, package, "joining in-flight install");
                return Ok(InstallStart {
                    status: "installing",
                    record_id: record.record_id,
                });
            }
            BeginInstall::AlreadyInstalled(record) => {
                return Ok(InstallStart {
                    status: "already_installed",
                    record_id: record.record_id,
                });
            }
            BeginInstall::Started(record) => record,
        };

        let driver = self.driver.clone();
        let installs = self.installs.clone();
        let container_id = sandbox.container_id.clone();
        let package = package.to_string();
        let argv = self.pip_install_argv(&package);

        tokio::spawn(async move {
            info!(sandbox_id = %sandbox_id, package = %package, "package install started");
            let (state, stdout, stderr) =
                match driver.exec(&container_id, &argv, INSTALL_TIMEOUT).await {
                    Ok(output) if output.exit_code == 0 => {
                        (InstallState::Success, output.stdout, output.stderr)
                    }
                    Ok(output) => (InstallState::Failed, output.stdout, output.stderr),
                    Err(e) => (InstallState::Failed, String::new(), e.to_string()),
                };
            if state == InstallState::Failed {
                warn!(sandbox_id = %sandbox_id, package = %package, "package install failed");
            }
            installs.complete(
                sandbox_id,
                &package,
                state,
                &stdout,
                &stderr,
                OffsetDateTime::now_utc(),
            );
        });

        self.touch(sandbox_id).await;

        Ok(InstallStart {
            status: "installing",
            record_id: record.record_id,
        })
    }

    fn pip_install_argv(&self, package: &str) -> Vec<String> {
        let mut argv = vec!["pip".to_string(), "install".to_string()];
        if let Some(index_url) = &self.config.pip_index_url {
            argv.push("--index-url".to_string());
            argv.push(index_url.clone());
        }
        argv.push(package.to_string());
        argv
    }

    /// Read the install record for (sandbox, package). Lock-free; may
    /// observe an in-flight installation.
    pub async fn check_package_status(
        &self,
        user_id: Uuid,
        sandbox_id: Uuid,
        package: &str,
    ) -> EngineResult<crate::install::InstallRecord> {
        self.authorized_sandbox(user_id, sandbox_id).await?;
        self.installs.get(sandbox_id, package).ok_or_else(|| {
            EngineError::NotFound(format!("no installation record for '{package}'"))
        })
    }

    /// Copy a host-side file into the sandbox.
    pub async fn upload_file(
        &self,
        user_id: Uuid,
        sandbox_id: Uuid,
        local_file_path: &str,
        dest_path: Option<&str>,
    ) -> EngineResult<String> {
        let dest = dest_path.unwrap_or(RESULTS_DIR);
        if !dest.starts_with('/') || dest.contains("..") {
            return Err(EngineError::InvalidArgument(format!(
                "destination must be an absolute container path: {dest}"
            )));
        }

        let file_name = std::path::Path::new(local_file_path)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!("not a file path: {local_file_path}"))
            })?
            .to_string();

        let contents = tokio::fs::read(local_file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotFound(format!("local file not found: {local_file_path}"))
            } else {
                EngineError::Io(e.to_string())
            }
        })?;

        let _guard = self.locks.acquire(sandbox_id).await;
        let sandbox = self.authorized_sandbox(user_id, sandbox_id).await?;

        self.driver
            .copy_into(&sandbox.container_id, dest, &file_name, &contents)
            .await?;

        self.touch(sandbox_id).await;
        Ok(format!("{}/{}", dest.trim_end_matches('/'), file_name))
    }

    /// Fetch a published file for serving. No authentication: the URL is
    /// the capability.
    pub async fn fetch_published_file(
        &self,
        sandbox_id: Uuid,
        rel_path: &str,
    ) -> EngineResult<(Vec<u8>, String)> {
        match self.publisher.fetch(sandbox_id, rel_path).await {
            Ok(found) => Ok(found),
            Err(PublishError::BadPath(msg)) => Err(EngineError::InvalidArgument(msg)),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<dyn RegistryStore> {
        &self.registry
    }

    pub(crate) fn driver(&self) -> &Arc<dyn ContainerDriver> {
        &self.driver
    }

    pub(crate) fn publisher(&self) -> &Arc<FilePublisher> {
        &self.publisher
    }
}

fn split_script_path() -> (&'static str, &'static str) {
    let (dir, name) = SCRIPT_PATH
        .rsplit_once('/')
        .expect("script path is absolute");
    (if dir.is_empty() { "/" } else { dir }, name)
}

/// Reject obviously malformed package requests before they reach pip.
fn validate_package_name(package: &str) -> EngineResult<()> {
    if package.is_empty() || package.len() > 128 {
        return Err(EngineError::InvalidArgument(
            "package name must be 1-128 characters".to_string(),
        ));
    }
    if package.starts_with('-') || package.chars().any(char::is_whitespace) {
        return Err(EngineError::InvalidArgument(format!(
            "invalid package name: {package}"
        )));
    }
    Ok(())
}

/// Files whose name is new, or whose (mtime, size) changed, relative to the
/// baseline. This is what lets the broker detect produced artifacts without
/// the executed code announcing them.
fn diff_entries(baseline: &[DirEntry], after: &[DirEntry]) -> Vec<DirEntry> {
    let before: HashMap<&str, &DirEntry> = baseline
        .iter()
        .map(|entry| (entry.name.as_str(), entry))
        .collect();

    after
        .iter()
        .filter(|entry| match before.get(entry.name.as_str()) {
            None => true,
            Some(old) => old.mtime != entry.mtime || old.size != entry.size,
        })
        .cloned()
        .collect()
}
