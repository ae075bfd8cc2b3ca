//! In-memory [`ContainerRuntime`] for tests.
//!
//! Containers, networks and images live in a map. Failures are injected
//! explicitly: crash-on-start, queued start/restart/remove errors, out-of-band
//! removal of containers and networks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWrite;

use hearth_engine::{
    ContainerInspect, ContainerRuntime, ContainerSpec, ContainerSummary, EngineError, EngineResult,
    ImageSummary, LogLine, LogOptions, LogSource, LogStream, NetworkSpec, NetworkSummary,
    StdinWriter,
};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub running: bool,
    pub exit_code: i64,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone)]
struct Crash {
    exit_code: i64,
    logs: Vec<String>,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    networks: HashMap<String, NetworkSummary>,
    images: HashSet<String>,
    crash_on_start: HashMap<String, Crash>,
    start_errors: VecDeque<EngineError>,
    restart_errors: VecDeque<EngineError>,
    remove_errors: VecDeque<EngineError>,
    stdin: HashMap<String, Arc<Mutex<Vec<u8>>>>,
}

#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
    next_id: AtomicUsize,
    pulls: AtomicUsize,
    creates: AtomicUsize,
    starts: AtomicUsize,
    pull_delay: Mutex<Option<Duration>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Failure injection ─────────────────────────────────────────

    /// Containers with this name exit with `exit_code` right after starting.
    pub fn crash_on_start(&self, name: &str, exit_code: i64, logs: &[&str]) {
        lock(&self.inner).crash_on_start.insert(
            name.to_string(),
            Crash {
                exit_code,
                logs: logs.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn clear_crash(&self, name: &str) {
        lock(&self.inner).crash_on_start.remove(name);
    }

    /// The next start call fails with `err`.
    pub fn fail_next_start(&self, err: EngineError) {
        lock(&self.inner).start_errors.push_back(err);
    }

    /// The next restart call fails with `err`.
    pub fn fail_next_restart(&self, err: EngineError) {
        lock(&self.inner).restart_errors.push_back(err);
    }

    /// The next remove call fails with `err`.
    pub fn fail_next_remove(&self, err: EngineError) {
        lock(&self.inner).remove_errors.push_back(err);
    }

    /// Delete a container behind the orchestrator's back.
    pub fn remove_out_of_band(&self, id_or_name: &str) {
        let mut inner = lock(&self.inner);
        if let Some(id) = resolve(&inner, id_or_name) {
            inner.containers.remove(&id);
        }
    }

    /// Delete a network behind the orchestrator's back.
    pub fn remove_network(&self, name: &str) {
        lock(&self.inner).networks.remove(name);
    }

    /// Stop a container behind the orchestrator's back.
    pub fn kill(&self, id_or_name: &str, exit_code: i64) {
        let mut inner = lock(&self.inner);
        let Some(id) = resolve(&inner, id_or_name) else {
            return;
        };
        if let Some(c) = inner.containers.get_mut(&id) {
            c.running = false;
            c.exit_code = exit_code;
        }
    }

    /// Add a container that hearth did not create.
    pub fn insert_unmanaged(&self, name: &str) -> String {
        let id = self.fresh_id();
        let spec = ContainerSpec {
            name: name.to_string(),
            image: "someone/else".to_string(),
            env: Vec::new(),
            cmd: None,
            labels: HashMap::new(),
            ports: Vec::new(),
            binds: Vec::new(),
            memory_bytes: 0,
            cpu_shares: 0,
            restart_policy: hearth_engine::RestartPolicy::No,
            network: "bridge".to_string(),
            privileged: false,
            open_stdin: false,
        };
        lock(&self.inner).containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                spec,
                running: true,
                exit_code: 0,
                logs: Vec::new(),
            },
        );
        id
    }

    /// Mark an image as already present locally.
    pub fn add_image(&self, reference: &str) {
        lock(&self.inner).images.insert(reference.to_string());
    }

    /// Make pulls take this long.
    pub fn set_pull_delay(&self, delay: Duration) {
        *lock(&self.pull_delay) = Some(delay);
    }

    // ── Observation ───────────────────────────────────────────────

    pub fn container(&self, id_or_name: &str) -> Option<FakeContainer> {
        let inner = lock(&self.inner);
        resolve(&inner, id_or_name).and_then(|id| inner.containers.get(&id).cloned())
    }

    /// All containers with this name.
    pub fn containers_named(&self, name: &str) -> Vec<FakeContainer> {
        lock(&self.inner)
            .containers
            .values()
            .filter(|c| c.spec.name == name)
            .cloned()
            .collect()
    }

    pub fn container_count(&self) -> usize {
        lock(&self.inner).containers.len()
    }

    pub fn network_count(&self) -> usize {
        lock(&self.inner).networks.len()
    }

    pub fn network_labels(&self, name: &str) -> Option<HashMap<String, String>> {
        lock(&self.inner).networks.get(name).map(|n| n.labels.clone())
    }

    /// Everything written to a container's stdin.
    pub fn stdin(&self, id: &str) -> String {
        lock(&self.inner)
            .stdin
            .get(id)
            .map(|buf| String::from_utf8_lossy(&lock(buf)).into_owned())
            .unwrap_or_default()
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{n:016x}{:048x}", n * 7919)
    }
}

fn resolve(inner: &Inner, id_or_name: &str) -> Option<String> {
    if inner.containers.contains_key(id_or_name) {
        return Some(id_or_name.to_string());
    }
    inner
        .containers
        .values()
        .find(|c| c.spec.name == id_or_name)
        .map(|c| c.id.clone())
}

fn no_such_container(id: &str) -> EngineError {
    EngineError::NotFound(format!("No such container: {id}"))
}

fn inspect_of(c: &FakeContainer) -> ContainerInspect {
    ContainerInspect {
        id: c.id.clone(),
        name: c.spec.name.clone(),
        image: c.spec.image.clone(),
        running: c.running,
        status: if c.running { "running" } else { "exited" }.to_string(),
        exit_code: c.exit_code,
        labels: c.spec.labels.clone(),
        binds: c.spec.binds.clone(),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerInspect> {
        let inner = lock(&self.inner);
        resolve(&inner, id)
            .and_then(|id| inner.containers.get(&id))
            .map(inspect_of)
            .ok_or_else(|| no_such_container(id))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        let id = self.fresh_id();
        let mut inner = lock(&self.inner);
        if inner.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(EngineError::Conflict(format!(
                "container name \"/{}\" is already in use",
                spec.name
            )));
        }
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                running: false,
                exit_code: 0,
                logs: Vec::new(),
            },
        );
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        let mut inner = lock(&self.inner);
        let id = resolve(&inner, id).ok_or_else(|| no_such_container(id))?;
        if let Some(err) = inner.start_errors.pop_front() {
            return Err(err);
        }
        let network = inner.containers[&id].spec.network.clone();
        if !inner.networks.contains_key(&network) {
            return Err(EngineError::NetworkNotFound(format!("network {network} not found")));
        }
        let crash = inner.crash_on_start.get(&inner.containers[&id].spec.name).cloned();
        let Some(c) = inner.containers.get_mut(&id) else {
            return Err(no_such_container(&id));
        };
        match crash {
            Some(crash) => {
                c.running = false;
                c.exit_code = crash.exit_code;
                c.logs.extend(crash.logs);
            }
            None => {
                c.running = true;
                c.exit_code = 0;
                c.logs.push("server started".to_string());
            }
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> EngineResult<()> {
        let mut inner = lock(&self.inner);
        let id = resolve(&inner, id).ok_or_else(|| no_such_container(id))?;
        if let Some(c) = inner.containers.get_mut(&id) {
            c.running = false;
        }
        Ok(())
    }

    async fn restart_container(&self, id: &str, _timeout: Duration) -> EngineResult<()> {
        let mut inner = lock(&self.inner);
        let id = resolve(&inner, id).ok_or_else(|| no_such_container(id))?;
        if let Some(err) = inner.restart_errors.pop_front() {
            return Err(err);
        }
        if let Some(c) = inner.containers.get_mut(&id) {
            c.running = true;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()> {
        let mut inner = lock(&self.inner);
        let id = resolve(&inner, id).ok_or_else(|| no_such_container(id))?;
        if let Some(err) = inner.remove_errors.pop_front() {
            return Err(err);
        }
        if inner.containers[&id].running && !force {
            return Err(EngineError::Conflict(format!(
                "cannot remove running container {id}"
            )));
        }
        inner.containers.remove(&id);
        Ok(())
    }

    async fn list_containers(
        &self,
        labels: &HashMap<String, String>,
        all: bool,
    ) -> EngineResult<Vec<ContainerSummary>> {
        let inner = lock(&self.inner);
        Ok(inner
            .containers
            .values()
            .filter(|c| all || c.running)
            .filter(|c| labels.iter().all(|(k, v)| c.spec.labels.get(k) == Some(v)))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{}", c.spec.name)],
                image: c.spec.image.clone(),
                state: if c.running { "running" } else { "exited" }.to_string(),
                labels: c.spec.labels.clone(),
            })
            .collect())
    }

    async fn container_logs(&self, id: &str, options: &LogOptions) -> EngineResult<LogStream> {
        let inner = lock(&self.inner);
        let id = resolve(&inner, id).ok_or_else(|| no_such_container(id))?;
        let logs = &inner.containers[&id].logs;
        let skip = options
            .tail
            .map(|n| logs.len().saturating_sub(n as usize))
            .unwrap_or(0);
        let lines: Vec<EngineResult<LogLine>> = logs[skip..]
            .iter()
            .map(|message| {
                Ok(LogLine {
                    source: LogSource::Stdout,
                    message: message.clone(),
                })
            })
            .collect();
        Ok(futures_util::stream::iter(lines).boxed())
    }

    async fn attach_stdin(&self, id: &str) -> EngineResult<StdinWriter> {
        let mut inner = lock(&self.inner);
        let id = resolve(&inner, id).ok_or_else(|| no_such_container(id))?;
        let buf = inner.stdin.entry(id).or_default().clone();
        Ok(Box::pin(RecordingWriter { buf }))
    }

    async fn list_networks(&self, name: &str) -> EngineResult<Vec<NetworkSummary>> {
        Ok(lock(&self.inner).networks.get(name).cloned().into_iter().collect())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> EngineResult<String> {
        let mut inner = lock(&self.inner);
        if inner.networks.contains_key(&spec.name) {
            return Err(EngineError::Conflict(format!("network {} already exists", spec.name)));
        }
        let id = format!("net-{}", inner.networks.len() + 1);
        inner.networks.insert(
            spec.name.clone(),
            NetworkSummary {
                id: id.clone(),
                name: spec.name.clone(),
                labels: spec.labels.clone(),
            },
        );
        Ok(id)
    }

    async fn list_images(&self, reference: &str) -> EngineResult<Vec<ImageSummary>> {
        let inner = lock(&self.inner);
        Ok(inner
            .images
            .get(reference)
            .map(|r| ImageSummary {
                id: format!("sha256:{r}"),
                repo_tags: vec![r.clone()],
            })
            .into_iter()
            .collect())
    }

    async fn pull_image(&self, reference: &str) -> EngineResult<()> {
        let delay = *lock(&self.pull_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.pulls.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner).images.insert(reference.to_string());
        Ok(())
    }
}

/// Stdin sink that records every byte written.
struct RecordingWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        lock(&self.buf).extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
