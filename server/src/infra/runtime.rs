//! Container runtime capability boundary
//!
//! Services talk to the container engine only through [`ContainerRuntime`].
//! The production implementation lives in `infra::docker`.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::AsyncWrite;

use crate::domain::types::CommandResult;
use crate::error::Result;

/// Container creation options
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOpts {
    /// Container name
    pub name: String,
    /// Image to use
    pub image: String,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Volume or host path -> container path
    pub volumes: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Internal (container) port -> host port
    pub port_bindings: HashMap<u16, u16>,
    /// Network mode
    pub network_mode: Option<String>,
    /// Extra hosts to add (e.g., "host.docker.internal:host-gateway")
    pub extra_hosts: Vec<String>,
}

/// Coarse runtime state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    Exited,
    Other,
}

/// What the runtime reports about a container
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub state: RuntimeState,
    /// Internal port -> bound host port
    pub port_bindings: HashMap<u16, u16>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == RuntimeState::Running
    }

    pub fn host_port_for(&self, internal_port: u16) -> Option<u16> {
        self.port_bindings.get(&internal_port).copied()
    }
}

/// One-shot command options
#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    pub cmd: Vec<String>,
    pub user: Option<String>,
}

impl ExecOpts {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }
}

/// Interactive shell options
#[derive(Debug, Clone)]
pub struct ShellOpts {
    pub shell: String,
    pub user: String,
    pub working_dir: String,
    pub env: HashMap<String, String>,
}

/// A live interactive shell attached through a pseudo-terminal
pub struct ShellHandle {
    /// Runtime id of the exec, used for resizing
    pub exec_id: String,
    /// Raw terminal output
    pub output: BoxStream<'static, Result<Bytes>>,
    /// Terminal input
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl std::fmt::Debug for ShellHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellHandle")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

/// Capability wrapper over a container engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and return its runtime id. Pulls the image if needed.
    async fn create_container(&self, opts: CreateContainerOpts) -> Result<String>;

    /// Start a container. Starting a running container succeeds.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Gracefully stop a container. Stopping a stopped container succeeds.
    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()>;

    /// Remove a container. Removing a missing container succeeds.
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// Inspect a container, `None` if the runtime does not know it
    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerInfo>>;

    /// Create a named volume unless it already exists
    async fn ensure_volume(&self, name: &str, labels: HashMap<String, String>) -> Result<()>;

    /// Run a command to completion, capturing stdout, stderr and exit code
    async fn exec(&self, container_id: &str, opts: ExecOpts) -> Result<CommandResult>;

    /// Start an interactive shell on a pseudo-terminal
    async fn open_shell(&self, container_id: &str, opts: ShellOpts) -> Result<ShellHandle>;

    /// Resize the pseudo-terminal of a shell
    async fn resize_shell(&self, exec_id: &str, rows: u16, cols: u16) -> Result<()>;

    /// Extract a tar archive into `path` inside the container
    async fn upload_archive(&self, container_id: &str, path: &str, archive: Bytes) -> Result<()>;
}
