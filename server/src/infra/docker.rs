//! Docker management layer

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, LogOutput,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
        UploadToContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{ContainerInspectResponse, ContainerStateStatusEnum, HostConfig, PortBinding},
    volume::CreateVolumeOptions,
    Docker,
};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use crate::domain::types::CommandResult;
use crate::error::{Error, Result};
use crate::infra::runtime::{
    ContainerInfo, ContainerRuntime, CreateContainerOpts, ExecOpts, RuntimeState, ShellHandle,
    ShellOpts,
};

/// Docker manager for container operations
pub struct DockerManager {
    client: Docker,
    exec_timeout: Duration,
}

impl DockerManager {
    /// Create a new Docker manager
    pub fn new(socket_path: Option<&str>, exec_timeout: Duration) -> Result<Self> {
        let client = match socket_path {
            Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| Error::DockerError(e.to_string()))?,
            None => Docker::connect_with_local_defaults()
                .map_err(|e| Error::DockerError(e.to_string()))?,
        };

        Ok(Self {
            client,
            exec_timeout,
        })
    }

    /// Check if Docker daemon is accessible
    pub async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| Error::DockerError(format!("Docker ping failed: {}", e)))?;
        Ok(())
    }

    /// Pull an image if not present
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let image_name = if image.contains(':') {
            image.to_string()
        } else {
            format!("{}:latest", image)
        };

        match self.client.inspect_image(&image_name).await {
            Ok(_) => {
                debug!("Image {} already exists", image_name);
                return Ok(());
            }
            Err(_) => {
                info!("Pulling image {}...", image_name);
            }
        }

        let options = CreateImageOptions {
            from_image: image_name.clone(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::DockerError(format!("Failed to pull image: {}", e)));
                }
            }
        }

        info!("Image {} pulled successfully", image_name);
        Ok(())
    }

    async fn run_exec(&self, container_id: &str, opts: ExecOpts) -> Result<CommandResult> {
        let exec = self
            .client
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(opts.cmd),
                    user: opts.user,
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::ExecFailed(format!("Failed to create exec: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        if let StartExecResults::Attached { mut output, .. } = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::ExecFailed(format!("Failed to start exec: {}", e)))?
        {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(|e| Error::ExecFailed(e.to_string()))? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        stdout.extend_from_slice(&message)
                    }
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::ExecFailed(format!("Failed to inspect exec: {}", e)))?;

        let (stdout, stdout_lossy) = match String::from_utf8(stdout) {
            Ok(text) => (text, false),
            Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), true),
        };

        Ok(CommandResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            stdout_lossy,
        })
    }
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn port_key(port: u16) -> String {
    format!("{}/tcp", port)
}

/// Extract internal -> host port bindings from an inspect response
fn bound_ports(info: &ContainerInspectResponse) -> HashMap<u16, u16> {
    let mut bindings = HashMap::new();
    let ports = info
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref());

    if let Some(ports) = ports {
        for (key, bound) in ports {
            let Some(internal) = key.split('/').next().and_then(|p| p.parse::<u16>().ok()) else {
                continue;
            };
            let host = bound
                .as_ref()
                .and_then(|list| list.iter().find_map(|b| b.host_port.as_deref()))
                .and_then(|p| p.parse::<u16>().ok());
            if let Some(host) = host {
                bindings.insert(internal, host);
            }
        }
    }

    bindings
}

fn runtime_state(info: &ContainerInspectResponse) -> RuntimeState {
    let state = info.state.as_ref();
    if state.and_then(|s| s.running).unwrap_or(false) {
        return RuntimeState::Running;
    }
    match state.and_then(|s| s.status) {
        Some(ContainerStateStatusEnum::RUNNING) => RuntimeState::Running,
        Some(ContainerStateStatusEnum::EXITED) => RuntimeState::Exited,
        _ => RuntimeState::Other,
    }
}

#[async_trait]
impl ContainerRuntime for DockerManager {
    async fn create_container(&self, opts: CreateContainerOpts) -> Result<String> {
        self.ensure_image(&opts.image).await?;

        let env: Vec<String> = opts
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let binds: Vec<String> = opts
            .volumes
            .iter()
            .map(|(source, target)| format!("{}:{}", source, target))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = opts
            .port_bindings
            .keys()
            .map(|internal| (port_key(*internal), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = opts
            .port_bindings
            .iter()
            .map(|(internal, host)| {
                (
                    port_key(*internal),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(host.to_string()),
                    }]),
                )
            })
            .collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            network_mode: opts.network_mode,
            extra_hosts: if opts.extra_hosts.is_empty() {
                None
            } else {
                Some(opts.extra_hosts)
            },
            ..Default::default()
        };

        let config = Config {
            image: Some(opts.image),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: opts.working_dir,
            cmd: opts.cmd,
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            labels: if opts.labels.is_empty() {
                None
            } else {
                Some(opts.labels)
            },
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: opts.name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::DockerError(format!("Failed to create container: {}", e)))?;

        info!("Container {} created with ID: {}", opts.name, response.id);
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        match self
            .client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => {
                info!("Container {} started", id);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(304) => {
                debug!("Container {} already running", id);
                Ok(())
            }
            Err(e) => Err(Error::DockerError(format!("Failed to start container: {}", e))),
        }
    }

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: timeout_secs };

        match self.client.stop_container(id, Some(options)).await {
            Ok(()) => {
                info!("Container {} stopped", id);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(304) => {
                debug!("Container {} already stopped", id);
                Ok(())
            }
            Err(e) => Err(Error::DockerError(format!("Failed to stop container: {}", e))),
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        match self.client.remove_container(id, Some(options)).await {
            Ok(()) => {
                info!("Container {} removed", id);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => {
                debug!("Container {} already gone", id);
                Ok(())
            }
            Err(e) => Err(Error::DockerError(format!("Failed to remove container: {}", e))),
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerInfo>> {
        let info = match self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info,
            Err(e) if status_code(&e) == Some(404) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(ContainerInfo {
            id: info.id.clone().unwrap_or_else(|| id.to_string()),
            state: runtime_state(&info),
            port_bindings: bound_ports(&info),
        }))
    }

    async fn ensure_volume(&self, name: &str, labels: HashMap<String, String>) -> Result<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels,
            ..Default::default()
        };

        match self.client.create_volume(options).await {
            Ok(_) => {
                debug!("Volume {} ready", name);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(409) => Ok(()),
            Err(e) => Err(Error::DockerError(format!("Failed to create volume: {}", e))),
        }
    }

    async fn exec(&self, container_id: &str, opts: ExecOpts) -> Result<CommandResult> {
        tokio::time::timeout(self.exec_timeout, self.run_exec(container_id, opts))
            .await
            .map_err(|_| Error::ExecTimeout)?
    }

    async fn open_shell(&self, container_id: &str, opts: ShellOpts) -> Result<ShellHandle> {
        let mut env = vec!["TERM=xterm-256color".to_string()];
        env.extend(opts.env.iter().map(|(k, v)| format!("{}={}", k, v)));

        let exec = self
            .client
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec![opts.shell]),
                    user: Some(opts.user),
                    working_dir: Some(opts.working_dir),
                    env: Some(env),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Terminal(format!("Failed to create shell: {}", e)))?;

        let started = self
            .client
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: true,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(|e| Error::Terminal(format!("Failed to start shell: {}", e)))?;

        match started {
            StartExecResults::Attached { output, input } => {
                let output = output
                    .map(|chunk| {
                        chunk
                            .map(|log| match log {
                                LogOutput::StdOut { message }
                                | LogOutput::StdErr { message }
                                | LogOutput::Console { message }
                                | LogOutput::StdIn { message } => message,
                            })
                            .map_err(|e| Error::Terminal(e.to_string()))
                    })
                    .boxed();

                info!("Shell {} attached in container {}", exec.id, container_id);
                Ok(ShellHandle {
                    exec_id: exec.id,
                    output,
                    input,
                })
            }
            StartExecResults::Detached => {
                Err(Error::Terminal("Shell started detached".to_string()))
            }
        }
    }

    async fn resize_shell(&self, exec_id: &str, rows: u16, cols: u16) -> Result<()> {
        self.client
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await
            .map_err(|e| Error::Terminal(format!("Failed to resize shell: {}", e)))
    }

    async fn upload_archive(&self, container_id: &str, path: &str, archive: Bytes) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container_id, Some(options), archive)
            .await
            .map_err(|e| Error::DockerError(format!("Failed to upload archive: {}", e)))
    }
}
