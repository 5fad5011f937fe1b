//! Filesystem-backed file publisher.

use crate::error::{PublishError, PublishResult};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Characters escaped inside a URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Owns `{results_root}/{sandbox_id}/…` on the host.
pub struct FilePublisher {
    root: PathBuf,
}

impl FilePublisher {
    /// Create a publisher rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> PublishResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a sandbox-relative path, rejecting anything that could escape
    /// `{root}/{sandbox_id}/`: `..`, absolute or prefixed components, and
    /// symlinked ancestors.
    fn safe_path(&self, sandbox_id: Uuid, rel_path: &str) -> PublishResult<PathBuf> {
        if rel_path.is_empty() {
            return Err(PublishError::BadPath("empty path".to_string()));
        }
        if rel_path.contains("..") || rel_path.starts_with('/') || rel_path.starts_with('\\') {
            return Err(PublishError::BadPath(format!(
                "path traversal not allowed: {rel_path}"
            )));
        }
        for component in Path::new(rel_path).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(PublishError::BadPath(format!(
                        "unsafe path component: {rel_path}"
                    )));
                }
            }
        }

        let sandbox_dir = self.root.join(sandbox_id.to_string());
        let path = sandbox_dir.join(rel_path);

        // Walk up to the nearest existing ancestor and verify it resolves
        // inside the root. This catches symlinks planted anywhere between
        // the root and the target, even when intermediate directories do
        // not exist yet.
        if let Ok(root_canonical) = self.root.canonicalize() {
            let mut ancestor = path.as_path();
            while let Some(parent) = ancestor.parent() {
                match std::fs::symlink_metadata(parent) {
                    Ok(_) => {
                        let parent_canonical = parent.canonicalize().map_err(|e| {
                            PublishError::BadPath(format!("unresolvable ancestor: {e}"))
                        })?;
                        if !parent_canonical.starts_with(&root_canonical) {
                            return Err(PublishError::BadPath(format!(
                                "resolved path escapes results root: {rel_path}"
                            )));
                        }
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(PublishError::Io(e)),
                }
                ancestor = parent;
            }
        }

        Ok(path)
    }

    /// Write a published file atomically (temp file + rename) and return its
    /// stable URL.
    pub async fn publish(
        &self,
        sandbox_id: Uuid,
        rel_path: &str,
        contents: &[u8],
    ) -> PublishResult<String> {
        let path = self.safe_path(sandbox_id, rel_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        debug!(sandbox_id = %sandbox_id, rel_path, size = contents.len(), "published file");
        Ok(self.url_for(sandbox_id, rel_path))
    }

    /// Read a published file back, with a content type inferred from its
    /// extension.
    pub async fn fetch(
        &self,
        sandbox_id: Uuid,
        rel_path: &str,
    ) -> PublishResult<(Vec<u8>, String)> {
        let path = self.safe_path(sandbox_id, rel_path)?;
        let contents = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PublishError::NotFound(format!("{sandbox_id}/{rel_path}"))
            } else {
                PublishError::Io(e)
            }
        })?;
        let content_type = mime_guess::from_path(rel_path)
            .first_or_octet_stream()
            .to_string();
        Ok((contents, content_type))
    }

    /// Delete a sandbox's whole subtree. Missing subtree is success.
    pub async fn forget(&self, sandbox_id: Uuid) -> PublishResult<()> {
        let dir = self.root.join(sandbox_id.to_string());
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PublishError::Io(e)),
        }
    }

    /// Delete files whose age at `now` exceeds `ttl`. Returns the number of
    /// files removed. Errors on individual files are logged and skipped.
    pub async fn prune(&self, now: SystemTime, ttl: Duration) -> PublishResult<u64> {
        let mut removed = 0u64;
        let mut sandboxes = fs::read_dir(&self.root).await?;
        while let Some(sandbox_dir) = sandboxes.next_entry().await? {
            if !sandbox_dir.file_type().await?.is_dir() {
                continue;
            }
            removed += self.prune_dir(&sandbox_dir.path(), now, ttl).await;
        }
        Ok(removed)
    }

    async fn prune_dir(&self, dir: &Path, now: SystemTime, ttl: Duration) -> u64 {
        let mut removed = 0u64;
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %current.display(), error = %e, "failed to read results directory");
                    continue;
                }
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                if meta.is_dir() {
                    stack.push(path);
                    continue;
                }
                let expired = meta
                    .modified()
                    .ok()
                    .and_then(|mtime| now.duration_since(mtime).ok())
                    .is_some_and(|age| age > ttl);
                if expired {
                    match fs::remove_file(&path).await {
                        Ok(()) => {
                            debug!(path = %path.display(), "pruned expired file");
                            removed += 1;
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "failed to prune file")
                        }
                    }
                }
            }
        }
        removed
    }

    /// Stable URL for a published file, percent-encoded per segment.
    pub fn url_for(&self, sandbox_id: Uuid, rel_path: &str) -> String {
        let encoded: Vec<String> = rel_path
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!("/sandbox/file/{}/{}", sandbox_id, encoded.join("/"))
    }
}
