//! In-memory container runtime for service tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::domain::types::CommandResult;
use crate::error::{Error, Result};
use crate::infra::runtime::{
    ContainerInfo, ContainerRuntime, CreateContainerOpts, ExecOpts, RuntimeState, ShellHandle,
    ShellOpts,
};

type ExecHandler = Box<dyn Fn(&str, &ExecOpts) -> Result<CommandResult> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub opts: CreateContainerOpts,
    pub state: RuntimeState,
    pub port_bindings: HashMap<u16, u16>,
}

/// Test side of an open shell
pub struct FakeShell {
    pub container_id: String,
    pub exec_id: String,
    pub opts: ShellOpts,
    /// Push terminal output; dropping it ends the stream
    pub output: mpsc::UnboundedSender<Result<Bytes>>,
    /// Read what the server wrote to the shell
    pub input: DuplexStream,
}

#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    volumes: Mutex<HashSet<String>>,
    exec_handler: Mutex<Option<ExecHandler>>,
    execs: Mutex<Vec<(String, ExecOpts)>>,
    uploads: Mutex<Vec<(String, String, Bytes)>>,
    removals: Mutex<Vec<String>>,
    resizes: Mutex<Vec<(String, u16, u16)>>,
    shells: Mutex<Vec<FakeShell>>,
    shells_opened: Mutex<usize>,
    misbind: AtomicBool,
    fail_start: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer exec calls with `handler` instead of an empty success
    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(&str, &ExecOpts) -> Result<CommandResult> + Send + Sync + 'static,
    {
        *self.exec_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Bind started containers one port above the requested one
    pub fn set_misbind(&self, on: bool) {
        self.misbind.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, on: bool) {
        self.fail_start.store(on, Ordering::SeqCst);
    }

    /// Insert a container that exists only at the runtime
    pub fn seed_container(&self, id: &str, name: &str, state: RuntimeState) {
        self.containers.lock().unwrap().insert(
            id.to_string(),
            FakeContainer {
                id: id.to_string(),
                opts: CreateContainerOpts {
                    name: name.to_string(),
                    ..Default::default()
                },
                state,
                port_bindings: HashMap::new(),
            },
        );
    }

    /// Remove a container behind the server's back
    pub fn kill_container(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    /// Stop a container behind the server's back
    pub fn exit_container(&self, id: &str) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.state = RuntimeState::Exited;
        }
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.containers.lock().unwrap().get(id).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.volumes.lock().unwrap().contains(name)
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.lock().unwrap().len()
    }

    pub fn execs(&self) -> Vec<(String, ExecOpts)> {
        self.execs.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, String, Bytes)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<String> {
        self.removals.lock().unwrap().clone()
    }

    pub fn resizes(&self) -> Vec<(String, u16, u16)> {
        self.resizes.lock().unwrap().clone()
    }

    pub fn shells_opened(&self) -> usize {
        *self.shells_opened.lock().unwrap()
    }

    /// Take the oldest open shell not yet taken by the test
    pub fn take_shell(&self) -> Option<FakeShell> {
        let mut shells = self.shells.lock().unwrap();
        if shells.is_empty() {
            None
        } else {
            Some(shells.remove(0))
        }
    }

    /// Resolve by id or by name, like the engine does
    fn resolve(&self, id_or_name: &str) -> Option<String> {
        let containers = self.containers.lock().unwrap();
        if containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        containers
            .values()
            .find(|c| c.opts.name == id_or_name)
            .map(|c| c.id.clone())
    }
}

fn not_found(id: &str) -> Error {
    Error::DockerError(format!("No such container: {}", id))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, opts: CreateContainerOpts) -> Result<String> {
        if self.resolve(&opts.name).is_some() {
            return Err(Error::DockerError(format!(
                "Conflict. The container name {} is already in use",
                opts.name
            )));
        }

        let id = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                opts,
                state: RuntimeState::Other,
                port_bindings: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::DockerError("start refused".to_string()));
        }
        let id = self.resolve(id).ok_or_else(|| not_found(id))?;
        let misbind = self.misbind.load(Ordering::SeqCst);

        let mut containers = self.containers.lock().unwrap();
        let container = containers.get_mut(&id).ok_or_else(|| not_found(&id))?;
        container.state = RuntimeState::Running;
        container.port_bindings = container
            .opts
            .port_bindings
            .iter()
            .map(|(internal, host)| (*internal, if misbind { host + 1 } else { *host }))
            .collect();
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout_secs: i64) -> Result<()> {
        let id = self.resolve(id).ok_or_else(|| not_found(id))?;
        if let Some(c) = self.containers.lock().unwrap().get_mut(&id) {
            c.state = RuntimeState::Exited;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<()> {
        self.removals.lock().unwrap().push(id.to_string());
        if let Some(id) = self.resolve(id) {
            self.containers.lock().unwrap().remove(&id);
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerInfo>> {
        let Some(id) = self.resolve(id) else {
            return Ok(None);
        };
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(&id)
            .map(|c| ContainerInfo {
                id: c.id.clone(),
                state: c.state,
                port_bindings: c.port_bindings.clone(),
            }))
    }

    async fn ensure_volume(&self, name: &str, _labels: HashMap<String, String>) -> Result<()> {
        self.volumes.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn exec(&self, container_id: &str, opts: ExecOpts) -> Result<CommandResult> {
        self.execs
            .lock()
            .unwrap()
            .push((container_id.to_string(), opts.clone()));

        match self.exec_handler.lock().unwrap().as_ref() {
            Some(handler) => handler(container_id, &opts),
            None => Ok(CommandResult::default()),
        }
    }

    async fn open_shell(&self, container_id: &str, opts: ShellOpts) -> Result<ShellHandle> {
        let running = self
            .container(container_id)
            .map(|c| c.state == RuntimeState::Running)
            .unwrap_or(false);
        if !running {
            return Err(Error::Terminal(format!(
                "container {} is not running",
                container_id
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (server_side, test_side) = tokio::io::duplex(64 * 1024);
        let exec_id = Uuid::new_v4().simple().to_string();

        *self.shells_opened.lock().unwrap() += 1;
        self.shells.lock().unwrap().push(FakeShell {
            container_id: container_id.to_string(),
            exec_id: exec_id.clone(),
            opts,
            output: tx,
            input: test_side,
        });

        Ok(ShellHandle {
            exec_id,
            output: UnboundedReceiverStream::new(rx).boxed(),
            input: Box::pin(server_side),
        })
    }

    async fn resize_shell(&self, exec_id: &str, rows: u16, cols: u16) -> Result<()> {
        self.resizes
            .lock()
            .unwrap()
            .push((exec_id.to_string(), rows, cols));
        Ok(())
    }

    async fn upload_archive(&self, container_id: &str, path: &str, archive: Bytes) -> Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((container_id.to_string(), path.to_string(), archive));
        Ok(())
    }
}
