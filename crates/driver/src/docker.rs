//! Docker Engine implementation of [`ContainerDriver`].

use crate::error::{DriverError, DriverResult};
use crate::{ContainerDriver, DirEntry, ExecOutput};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use cinderbox_core::CONTAINER_LABEL;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Cap applied to each captured exec stream.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Appended when a stream hits [`MAX_CAPTURE_BYTES`].
const TRUNCATION_SENTINEL: &str = "\n…[output truncated]";

/// Memory ceiling for sandbox containers (swap pinned to the same value, so
/// swapping is effectively disabled).
const MEMORY_LIMIT_BYTES: i64 = 1024 * 1024 * 1024;

/// Container driver backed by the Docker Engine API.
pub struct DockerDriver {
    docker: Docker,
    base_image: String,
}

impl DockerDriver {
    /// Connect to the local Docker daemon.
    pub fn new(base_image: impl Into<String>) -> DriverResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DriverError::RuntimeUnavailable(e.to_string()))?;
        Ok(Self {
            docker,
            base_image: base_image.into(),
        })
    }

    /// Build from an existing client, for callers that configure the
    /// connection themselves.
    pub fn with_client(docker: Docker, base_image: impl Into<String>) -> Self {
        Self {
            docker,
            base_image: base_image.into(),
        }
    }

    fn container_error(e: bollard::errors::Error, container_id: &str) -> DriverError {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => DriverError::NoSuchContainer(container_id.to_string()),
            other => DriverError::RuntimeUnavailable(other.to_string()),
        }
    }

    /// Best-effort SIGKILL of a timed-out exec process inside the container.
    async fn kill_exec(&self, container_id: &str, exec_id: &str) {
        let pid = match self.docker.inspect_exec(exec_id).await {
            Ok(inspect) => inspect.pid,
            Err(e) => {
                warn!(container_id, error = %e, "failed to inspect timed-out exec");
                None
            }
        };
        let Some(pid) = pid else { return };

        let kill = CreateExecOptions {
            cmd: Some(vec!["kill".to_string(), "-9".to_string(), pid.to_string()]),
            ..Default::default()
        };
        match self.docker.create_exec(container_id, kill).await {
            Ok(exec) => {
                if let Err(e) = self.docker.start_exec(&exec.id, None).await {
                    warn!(container_id, pid, error = %e, "failed to kill timed-out exec");
                }
            }
            Err(e) => warn!(container_id, pid, error = %e, "failed to kill timed-out exec"),
        }
    }
}

/// Append a frame to a capped buffer, adding the sentinel exactly once.
fn push_capped(buf: &mut String, frame: &[u8], truncated: &mut bool) {
    if *truncated {
        return;
    }
    let remaining = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
    let text = String::from_utf8_lossy(frame);
    if text.len() <= remaining {
        buf.push_str(&text);
    } else {
        let mut end = remaining;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        buf.push_str(&text[..end]);
        buf.push_str(TRUNCATION_SENTINEL);
        *truncated = true;
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn create_and_start(&self, name: &str) -> DriverResult<String> {
        let mut labels = HashMap::new();
        labels.insert(CONTAINER_LABEL.to_string(), "true".to_string());

        let config = Config {
            image: Some(self.base_image.clone()),
            // Keep the container alive; all work happens through exec.
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(cinderbox_core::RESULTS_DIR.to_string()),
            user: Some("1000:1000".to_string()),
            labels: Some(labels),
            host_config: Some(HostConfig {
                memory: Some(MEMORY_LIMIT_BYTES),
                memory_swap: Some(MEMORY_LIMIT_BYTES),
                network_mode: Some("bridge".to_string()),
                privileged: Some(false),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => DriverError::ImageMissing(message),
                other => DriverError::RuntimeUnavailable(other.to_string()),
            })?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| Self::container_error(e, &created.id))?;

        debug!(container_id = %created.id, name, "container created and started");
        Ok(created.id)
    }

    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        timeout: Duration,
    ) -> DriverResult<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Self::container_error(e, container_id))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut stdout_truncated = false;
        let mut stderr_truncated = false;

        let collect = async {
            match self
                .docker
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| Self::container_error(e, container_id))?
            {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(frame) = output.next().await {
                        match frame.map_err(|e| Self::container_error(e, container_id))? {
                            LogOutput::StdOut { message } => {
                                push_capped(&mut stdout, &message, &mut stdout_truncated)
                            }
                            LogOutput::StdErr { message } => {
                                push_capped(&mut stderr, &message, &mut stderr_truncated)
                            }
                            LogOutput::Console { message } => {
                                push_capped(&mut stdout, &message, &mut stdout_truncated)
                            }
                            _ => {}
                        }
                    }
                    Ok(())
                }
                StartExecResults::Detached => Ok(()),
            }
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                self.kill_exec(container_id, &exec.id).await;
                return Err(DriverError::ExecTimeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Self::container_error(e, container_id))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(0),
            stdout,
            stderr,
        })
    }

    async fn copy_into(
        &self,
        container_id: &str,
        dest_dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> DriverResult<()> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, file_name, contents)?;
        let archive = builder.into_inner()?;

        self.docker
            .upload_to_container(
                container_id,
                Some(UploadToContainerOptions {
                    path: dest_dir.to_string(),
                    ..Default::default()
                }),
                Bytes::from(archive),
            )
            .await
            .map_err(|e| Self::container_error(e, container_id))
    }

    async fn copy_out(&self, container_id: &str, path: &str) -> DriverResult<Vec<u8>> {
        let mut stream = self.docker.download_from_container(
            container_id,
            Some(DownloadFromContainerOptions {
                path: path.to_string(),
            }),
        );

        let mut archive_bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => DriverError::NotFound(path.to_string()),
                other => DriverError::RuntimeUnavailable(other.to_string()),
            })?;
            archive_bytes.extend_from_slice(&chunk);
        }

        let mut archive = tar::Archive::new(archive_bytes.as_slice());
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_file() {
                let mut contents = Vec::with_capacity(entry.size() as usize);
                std::io::Read::read_to_end(&mut entry, &mut contents)?;
                return Ok(contents);
            }
        }
        Err(DriverError::NotFound(path.to_string()))
    }

    async fn list_dir(&self, container_id: &str, dir: &str) -> DriverResult<Vec<DirEntry>> {
        // %P is the path relative to the search root, %T@ the mtime in
        // fractional epoch seconds. A missing directory lists as empty.
        let script = format!(
            "if [ -d '{dir}' ]; then cd '{dir}' && find . -type f -printf '%P|%T@|%s\\n'; fi"
        );
        let argv = vec!["sh".to_string(), "-c".to_string(), script];
        let output = self
            .exec(container_id, &argv, Duration::from_secs(30))
            .await?;

        let mut entries = Vec::new();
        for line in output.stdout.lines() {
            let mut parts = line.splitn(3, '|');
            let (Some(name), Some(mtime), Some(size)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let mtime = mtime
                .split('.')
                .next()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            let size = size.trim().parse::<u64>().unwrap_or(0);
            entries.push(DirEntry {
                name: name.to_string(),
                size,
                mtime,
            });
        }
        Ok(entries)
    }

    async fn exists(&self, container_id: &str) -> DriverResult<bool> {
        match self.docker.inspect_container(container_id, None).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(DriverError::RuntimeUnavailable(e.to_string())),
        }
    }

    async fn remove(&self, container_id: &str) -> DriverResult<()> {
        match self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Already gone is as removed as it gets.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(DriverError::RuntimeUnavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_push_truncates_once() {
        let mut buf = String::new();
        let mut truncated = false;
        push_capped(&mut buf, &vec![b'a'; MAX_CAPTURE_BYTES], &mut truncated);
        assert!(!truncated);

        push_capped(&mut buf, b"overflow", &mut truncated);
        assert!(truncated);
        assert!(buf.ends_with(TRUNCATION_SENTINEL));

        let len_after = buf.len();
        push_capped(&mut buf, b"more", &mut truncated);
        assert_eq!(buf.len(), len_after);
    }

    #[test]
    fn capped_push_respects_char_boundaries() {
        let mut buf = "a".repeat(MAX_CAPTURE_BYTES - 1);
        let mut truncated = false;
        // A multi-byte char that would straddle the cap must not split.
        push_capped(&mut buf, "é".as_bytes(), &mut truncated);
        assert!(truncated);
        assert!(buf.ends_with(TRUNCATION_SENTINEL));
    }
}
