//! In-memory [`ContainerDriver`] for tests.
//!
//! Simulates a container runtime without a daemon: containers are entries in
//! a map, their filesystems are path-keyed byte maps with a logical mtime
//! clock, and exec behavior is a pluggable handler. Engine and server tests
//! use this to exercise full flows deterministically.

use crate::error::{DriverError, DriverResult};
use crate::{ContainerDriver, DirEntry, ExecOutput};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A file inside a fake container.
#[derive(Debug, Clone)]
pub struct FakeFile {
    pub contents: Vec<u8>,
    pub mtime: i64,
}

/// A simulated container.
#[derive(Debug, Default)]
pub struct FakeContainer {
    /// Absolute path -> file.
    pub files: BTreeMap<String, FakeFile>,
}

/// Exec behavior hook. Receives the container's filesystem, the argv, and
/// the current logical clock; returns the exec outcome.
pub type ExecHandler =
    Box<dyn FnMut(&mut FakeContainer, &[String], i64) -> DriverResult<ExecOutput> + Send>;

/// In-memory container runtime.
pub struct FakeDriver {
    containers: Mutex<HashMap<String, FakeContainer>>,
    exec_handler: Mutex<Option<ExecHandler>>,
    exec_delay: Mutex<Duration>,
    exec_count: AtomicUsize,
    created: AtomicUsize,
    clock: AtomicI64,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
    fail_creates: Mutex<bool>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            exec_handler: Mutex::new(None),
            exec_delay: Mutex::new(Duration::ZERO),
            exec_count: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            clock: AtomicI64::new(1_000),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: Mutex::new(HashMap::new()),
            fail_creates: Mutex::new(false),
        }
    }

    /// Install an exec handler. Without one, every exec succeeds with empty
    /// output.
    pub fn set_exec_handler(&self, handler: ExecHandler) {
        *self.exec_handler.lock().unwrap() = Some(handler);
    }

    /// Delay injected before each exec runs, to widen race windows in
    /// concurrency tests.
    pub fn set_exec_delay(&self, delay: Duration) {
        *self.exec_delay.lock().unwrap() = delay;
    }

    /// Make subsequent `create_and_start` calls fail.
    pub fn fail_creates(&self, fail: bool) {
        *self.fail_creates.lock().unwrap() = fail;
    }

    /// Total execs observed.
    pub fn exec_count(&self) -> usize {
        self.exec_count.load(Ordering::SeqCst)
    }

    /// Highest number of execs observed running simultaneously against one
    /// container.
    pub fn max_concurrent_execs(&self, container_id: &str) -> usize {
        self.max_in_flight
            .lock()
            .unwrap()
            .get(container_id)
            .copied()
            .unwrap_or(0)
    }

    /// Ids of containers the runtime currently knows.
    pub fn container_ids(&self) -> Vec<String> {
        self.containers.lock().unwrap().keys().cloned().collect()
    }

    /// Seed a file into a container, as if code inside it had written one.
    pub fn write_file(&self, container_id: &str, path: &str, contents: &[u8]) {
        let mtime = self.tick();
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(container_id)
            .expect("unknown fake container");
        container.files.insert(
            path.to_string(),
            FakeFile {
                contents: contents.to_vec(),
                mtime,
            },
        );
    }

    /// Remove a container behind the broker's back, as if an operator ran
    /// `docker rm` out-of-band.
    pub fn remove_out_of_band(&self, container_id: &str) {
        self.containers.lock().unwrap().remove(container_id);
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_exists(&self, container_id: &str) -> DriverResult<()> {
        if self.containers.lock().unwrap().contains_key(container_id) {
            Ok(())
        } else {
            Err(DriverError::NoSuchContainer(container_id.to_string()))
        }
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn create_and_start(&self, _name: &str) -> DriverResult<String> {
        if *self.fail_creates.lock().unwrap() {
            return Err(DriverError::RuntimeUnavailable(
                "fake runtime is down".to_string(),
            ));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake-container-{n}");
        self.containers
            .lock()
            .unwrap()
            .insert(id.clone(), FakeContainer::default());
        Ok(id)
    }

    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        _timeout: Duration,
    ) -> DriverResult<ExecOutput> {
        self.check_exists(container_id)?;
        self.exec_count.fetch_add(1, Ordering::SeqCst);

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(container_id.to_string()).or_insert(0);
            *count += 1;
            let mut max = self.max_in_flight.lock().unwrap();
            let peak = max.entry(container_id.to_string()).or_insert(0);
            *peak = (*peak).max(*count);
        }

        let delay = *self.exec_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let now = self.tick();
        let result = {
            let mut containers = self.containers.lock().unwrap();
            match containers.get_mut(container_id) {
                None => Err(DriverError::NoSuchContainer(container_id.to_string())),
                Some(container) => match self.exec_handler.lock().unwrap().as_mut() {
                    Some(handler) => handler(container, argv, now),
                    None => Ok(ExecOutput::default()),
                },
            }
        };

        if let Some(count) = self.in_flight.lock().unwrap().get_mut(container_id) {
            *count -= 1;
        }

        result
    }

    async fn copy_into(
        &self,
        container_id: &str,
        dest_dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> DriverResult<()> {
        self.check_exists(container_id)?;
        let path = format!("{}/{}", dest_dir.trim_end_matches('/'), file_name);
        self.write_file(container_id, &path, contents);
        Ok(())
    }

    async fn copy_out(&self, container_id: &str, path: &str) -> DriverResult<Vec<u8>> {
        self.check_exists(container_id)?;
        let containers = self.containers.lock().unwrap();
        containers
            .get(container_id)
            .and_then(|c| c.files.get(path))
            .map(|f| f.contents.clone())
            .ok_or_else(|| DriverError::NotFound(path.to_string()))
    }

    async fn list_dir(&self, container_id: &str, dir: &str) -> DriverResult<Vec<DirEntry>> {
        self.check_exists(container_id)?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let containers = self.containers.lock().unwrap();
        let container = containers.get(container_id).unwrap();
        Ok(container
            .files
            .iter()
            .filter_map(|(path, file)| {
                path.strip_prefix(&prefix).map(|name| DirEntry {
                    name: name.to_string(),
                    size: file.contents.len() as u64,
                    mtime: file.mtime,
                })
            })
            .collect())
    }

    async fn exists(&self, container_id: &str) -> DriverResult<bool> {
        Ok(self.containers.lock().unwrap().contains_key(container_id))
    }

    async fn remove(&self, container_id: &str) -> DriverResult<()> {
        self.containers.lock().unwrap().remove(container_id);
        Ok(())
    }
}
