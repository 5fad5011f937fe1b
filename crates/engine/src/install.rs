//! In-memory package installation records.

use std::collections::HashMap;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

/// Cap applied to stored stdout/stderr tails.
const TAIL_BYTES: usize = 4096;

/// Lifecycle state of one (sandbox, package) installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Installing,
    Success,
    Failed,
}

impl InstallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Status of one (sandbox, package) installation attempt.
#[derive(Debug, Clone)]
pub struct InstallRecord {
    pub record_id: Uuid,
    pub state: InstallState,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// Outcome of an `install_package` prologue.
#[derive(Debug, Clone)]
pub enum BeginInstall {
    /// A fresh record was created; the caller must launch the install task.
    Started(InstallRecord),
    /// An identical install is in flight; the request joins it.
    Joined(InstallRecord),
    /// The package already installed successfully; nothing to do.
    AlreadyInstalled(InstallRecord),
}

/// Table of install records, keyed by (sandbox, package).
///
/// The table's own mutex only guards map access; transitions hold it
/// briefly and never across a suspension point. Admission (`begin`) is
/// called under the per-sandbox lock, which is what guarantees at most one
/// `installing` record per pair.
#[derive(Default)]
pub struct InstallTable {
    inner: Mutex<HashMap<(Uuid, String), InstallRecord>>,
}

impl InstallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an install request for (sandbox, package).
    pub fn begin(&self, sandbox_id: Uuid, package: &str, now: OffsetDateTime) -> BeginInstall {
        let mut table = self.inner.lock().unwrap();
        let key = (sandbox_id, package.to_string());

        if let Some(existing) = table.get(&key) {
            match existing.state {
                InstallState::Installing => return BeginInstall::Joined(existing.clone()),
                InstallState::Success => return BeginInstall::AlreadyInstalled(existing.clone()),
                InstallState::Failed => {}
            }
        }

        let record = InstallRecord {
            record_id: Uuid::new_v4(),
            state: InstallState::Installing,
            started_at: now,
            finished_at: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        };
        table.insert(key, record.clone());
        BeginInstall::Started(record)
    }

    /// Transition a record to a terminal state with captured output tails.
    pub fn complete(
        &self,
        sandbox_id: Uuid,
        package: &str,
        state: InstallState,
        stdout: &str,
        stderr: &str,
        now: OffsetDateTime,
    ) {
        let mut table = self.inner.lock().unwrap();
        if let Some(record) = table.get_mut(&(sandbox_id, package.to_string())) {
            record.state = state;
            record.finished_at = Some(now);
            record.stdout_tail = tail(stdout);
            record.stderr_tail = tail(stderr);
        }
    }

    /// Lock-free-for-callers read of a record.
    pub fn get(&self, sandbox_id: Uuid, package: &str) -> Option<InstallRecord> {
        self.inner
            .lock()
            .unwrap()
            .get(&(sandbox_id, package.to_string()))
            .cloned()
    }

    /// Drop every record belonging to a sandbox.
    pub fn drop_sandbox(&self, sandbox_id: Uuid) {
        self.inner
            .lock()
            .unwrap()
            .retain(|(sid, _), _| *sid != sandbox_id);
    }
}

/// Keep the last [`TAIL_BYTES`] of a string, on a char boundary.
fn tail(s: &str) -> String {
    if s.len() <= TAIL_BYTES {
        return s.to_string();
    }
    let mut start = s.len() - TAIL_BYTES;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_begin_joins_the_same_record() {
        let table = InstallTable::new();
        let sandbox = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();

        let first = match table.begin(sandbox, "numpy", now) {
            BeginInstall::Started(record) => record,
            other => panic!("expected Started, got {other:?}"),
        };
        let second = match table.begin(sandbox, "numpy", now) {
            BeginInstall::Joined(record) => record,
            other => panic!("expected Joined, got {other:?}"),
        };
        assert_eq!(first.record_id, second.record_id);
    }

    #[test]
    fn success_short_circuits_reinstall_and_failure_retries() {
        let table = InstallTable::new();
        let sandbox = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();

        let first = match table.begin(sandbox, "numpy", now) {
            BeginInstall::Started(record) => record,
            other => panic!("expected Started, got {other:?}"),
        };
        table.complete(sandbox, "numpy", InstallState::Success, "ok", "", now);
        match table.begin(sandbox, "numpy", now) {
            BeginInstall::AlreadyInstalled(record) => {
                assert_eq!(record.record_id, first.record_id)
            }
            other => panic!("expected AlreadyInstalled, got {other:?}"),
        }

        table.complete(sandbox, "numpy", InstallState::Failed, "", "boom", now);
        match table.begin(sandbox, "numpy", now) {
            BeginInstall::Started(record) => assert_ne!(record.record_id, first.record_id),
            other => panic!("expected Started after failure, got {other:?}"),
        }
    }

    #[test]
    fn drop_sandbox_removes_only_that_sandbox() {
        let table = InstallTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();

        table.begin(a, "numpy", now);
        table.begin(b, "numpy", now);
        table.drop_sandbox(a);

        assert!(table.get(a, "numpy").is_none());
        assert!(table.get(b, "numpy").is_some());
    }

    #[test]
    fn tails_are_capped_on_char_boundaries() {
        let long = "é".repeat(TAIL_BYTES);
        let tailed = tail(&long);
        assert!(tailed.len() <= TAIL_BYTES);
        assert!(tailed.chars().all(|c| c == 'é'));
    }
}
