//! Container lifecycle service
//!
//! The runtime is authoritative: every operation reconciles the stored
//! container row against what the runtime reports before acting on it.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::domain::container::{Container, ContainerStatus, PreviewDetails, ProvisionOutcome};
use crate::domain::project::{Project, Template};
use crate::error::{Error, Result};
use crate::infra::archive::{self, EntryOwner};
use crate::infra::ports::PortAllocator;
use crate::infra::project_repository::ProjectRepository;
use crate::infra::runtime::{ContainerRuntime, CreateContainerOpts, RuntimeState};
use crate::infra::sqlite::ContainerRepository;
use crate::service::filesystem::FileSyncService;
use crate::Config;

/// Label keys for identifying project containers
const PROJECT_LABEL_KEY: &str = "ide.project.id";
const TEMPLATE_LABEL_KEY: &str = "ide.template.id";

/// Hosts served over plain http when no protocol is configured or forwarded
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "[::1]", "::1"];

/// Request facts used to build a preview URL
#[derive(Debug, Clone, Default)]
pub struct PreviewRequest {
    /// Host header of the incoming request
    pub host: Option<String>,
    /// `X-Forwarded-Proto` of the incoming request
    pub forwarded_proto: Option<String>,
}

/// A host port held between allocation and persistence
struct PortReservation<'a> {
    port: u16,
    pending: &'a Mutex<HashSet<u16>>,
}

impl Drop for PortReservation<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.port);
        }
    }
}

/// Container lifecycle service
pub struct ContainerService {
    containers: Arc<ContainerRepository>,
    projects: Arc<ProjectRepository>,
    runtime: Arc<dyn ContainerRuntime>,
    files: Arc<FileSyncService>,
    ports: PortAllocator,
    pending_ports: Mutex<HashSet<u16>>,
    project_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    config: Arc<Config>,
}

impl ContainerService {
    /// Create a new container service
    pub fn new(
        containers: Arc<ContainerRepository>,
        projects: Arc<ProjectRepository>,
        runtime: Arc<dyn ContainerRuntime>,
        files: Arc<FileSyncService>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            containers,
            projects,
            runtime,
            files,
            ports: PortAllocator::new(config.port_range_start, config.port_range_end),
            pending_ports: Mutex::new(HashSet::new()),
            project_locks: DashMap::new(),
            config,
        }
    }

    fn project_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.project_locks
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the provisioning lock of a deleted project
    pub fn forget_project(&self, project_id: &str) {
        self.project_locks.remove(project_id);
    }

    /// Resolve a full container id from an exact id or unique prefix
    pub async fn resolve_id(&self, id: &str) -> Result<String> {
        self.containers
            .find_by_id_or_prefix(id)
            .await?
            .map(|c| c.id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
    }

    /// Return the project's usable container, provisioning a new one if needed
    pub async fn create_or_retrieve(
        &self,
        project_id: &str,
        template_id: &str,
    ) -> Result<(Container, ProvisionOutcome)> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        let project = self.projects.get(project_id).await?;
        let template = self.projects.get_template(template_id).await?;
        let (image, internal_port) = template
            .runtime_spec()
            .ok_or_else(|| Error::TemplateIncomplete(template.id.clone()))?;

        if let Some(existing) = self.containers.find_by_project(&project.id).await? {
            if let Some(container) = self.reuse(existing, &template.id).await? {
                if project.container_id.as_deref() != Some(container.id.as_str()) {
                    self.projects.set_container(&project.id, &container.id).await?;
                }
                self.adopt_template(&project, &template).await?;
                info!("Retrieved container {} for project {}", container.id, project.id);
                return Ok((container, ProvisionOutcome::Retrieved));
            }
        }

        let container = self
            .provision(&project, &template, image, internal_port)
            .await?;
        self.adopt_template(&project, &template).await?;
        info!(
            "Created container {} for project {} on host port {:?}",
            container.id, project.id, container.host_port
        );
        Ok((container, ProvisionOutcome::Created))
    }

    /// Point the project at the template its container now runs
    async fn adopt_template(&self, project: &Project, template: &Template) -> Result<()> {
        if project.template_id != template.id {
            self.projects.update_template(&project.id, &template.id).await?;
        }
        Ok(())
    }

    /// Bring an existing container back into service, or clear it out of the way
    async fn reuse(&self, mut existing: Container, template_id: &str) -> Result<Option<Container>> {
        if existing.is_deleted() {
            if let Err(e) = self.runtime.remove_container(&existing.id, true).await {
                warn!("Failed to remove deleted container {}: {}", existing.id, e);
            }
            self.containers.delete_row(&existing.id).await?;
            return Ok(None);
        }

        let Some(info) = self.runtime.inspect_container(&existing.id).await? else {
            warn!(
                "Container {} of project {} is gone from the runtime, dropping its record",
                existing.id, existing.project_id
            );
            self.containers.delete_row(&existing.id).await?;
            return Ok(None);
        };

        if existing.template_id != template_id {
            info!(
                "Template of project {} changed from {} to {}, replacing container {}",
                existing.project_id, existing.template_id, template_id, existing.id
            );
            self.runtime.remove_container(&existing.id, true).await?;
            self.containers.delete_row(&existing.id).await?;
            return Ok(None);
        }

        if info.is_running() {
            reconcile(&mut existing, ContainerStatus::Running);
        } else {
            match self.runtime.start_container(&existing.id).await {
                Ok(()) => {
                    existing.mark_started();
                }
                Err(e) => {
                    warn!(
                        "Failed to restart container {}, recreating it: {}",
                        existing.id, e
                    );
                    if let Err(e) = self.runtime.remove_container(&existing.id, true).await {
                        warn!("Failed to remove container {}: {}", existing.id, e);
                    }
                    self.containers.delete_row(&existing.id).await?;
                    return Ok(None);
                }
            }
        }

        self.containers.update(&existing).await?;
        Ok(Some(existing))
    }

    /// Reserve a free host port until the returned guard drops
    async fn reserve_port(&self) -> Result<PortReservation<'_>> {
        let mut reserved = self.containers.reserved_ports().await?;

        let mut pending = self
            .pending_ports
            .lock()
            .map_err(|_| Error::Internal("port reservations poisoned".to_string()))?;
        reserved.extend(pending.iter().copied());

        let port = self.ports.allocate(&reserved)?;
        pending.insert(port);

        Ok(PortReservation {
            port,
            pending: &self.pending_ports,
        })
    }

    fn container_opts(
        &self,
        project: &Project,
        template: &Template,
        image: &str,
        host_port: u16,
        internal_port: u16,
    ) -> CreateContainerOpts {
        let mut env = HashMap::new();
        env.insert(
            "ASSET_PREFIX".to_string(),
            format!("/preview/container/{}/", host_port),
        );
        env.insert("PORT".to_string(), internal_port.to_string());
        env.insert("WATCH_DIR".to_string(), self.config.workspace_dir.clone());
        env.insert(
            "WATCH_CALLBACK_HOST".to_string(),
            self.config.watcher_callback_host.clone(),
        );
        env.insert(
            "WATCH_CALLBACK_PORT".to_string(),
            self.config.watcher_port().to_string(),
        );
        env.insert(
            "WATCH_CALLBACK_ENDPOINT".to_string(),
            self.config.watcher_endpoint.clone(),
        );
        env.insert(
            "WATCH_EXCLUDES".to_string(),
            self.config.excluded_dirs.join(","),
        );

        let mut volumes = HashMap::new();
        volumes.insert(
            self.config.volume_name(&project.id),
            self.config.workspace_dir.clone(),
        );

        let mut labels = HashMap::new();
        labels.insert(PROJECT_LABEL_KEY.to_string(), project.id.clone());
        labels.insert(TEMPLATE_LABEL_KEY.to_string(), template.id.clone());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(internal_port, host_port);

        CreateContainerOpts {
            name: self.config.container_name(&project.id),
            image: image.to_string(),
            env,
            volumes,
            working_dir: Some(self.config.workspace_dir.clone()),
            cmd: template
                .start_command
                .as_ref()
                .filter(|c| !c.trim().is_empty())
                .map(|c| vec!["sh".to_string(), "-c".to_string(), c.clone()]),
            labels,
            port_bindings,
            network_mode: self.config.docker_network.clone(),
            extra_hosts: self.config.container_extra_hosts.clone(),
        }
    }

    /// Create, start, verify and populate a fresh container
    async fn provision(
        &self,
        project: &Project,
        template: &Template,
        image: &str,
        internal_port: u16,
    ) -> Result<Container> {
        let reservation = self.reserve_port().await?;
        let host_port = reservation.port;

        let volume = self.config.volume_name(&project.id);
        let mut volume_labels = HashMap::new();
        volume_labels.insert(PROJECT_LABEL_KEY.to_string(), project.id.clone());
        self.runtime.ensure_volume(&volume, volume_labels).await?;

        let name = self.config.container_name(&project.id);
        if let Err(e) = self.runtime.remove_container(&name, true).await {
            warn!("Failed to remove stale container {}: {}", name, e);
        }

        let opts = self.container_opts(project, template, image, host_port, internal_port);
        let container_id = self.runtime.create_container(opts).await?;

        match self
            .start_and_populate(&container_id, project, template, host_port, internal_port)
            .await
        {
            Ok(container) => Ok(container),
            Err(e) => {
                error!("Provisioning container {} failed: {}", container_id, e);
                if let Err(rm) = self.runtime.remove_container(&container_id, true).await {
                    warn!("Failed to clean up container {}: {}", container_id, rm);
                }
                Err(e)
            }
        }
    }

    async fn start_and_populate(
        &self,
        container_id: &str,
        project: &Project,
        template: &Template,
        host_port: u16,
        internal_port: u16,
    ) -> Result<Container> {
        self.runtime.start_container(container_id).await?;

        let info = self
            .runtime
            .inspect_container(container_id)
            .await?
            .ok_or_else(|| Error::ContainerNotFound(container_id.to_string()))?;
        let bound = info.host_port_for(internal_port);
        if bound != Some(host_port) {
            return Err(Error::PortBindingMismatch {
                container_id: container_id.to_string(),
                expected: host_port,
                actual: bound,
            });
        }

        if let Some(source_dir) = template.source_dir.as_deref().filter(|d| !d.is_empty()) {
            let owner = EntryOwner {
                uid: self.config.workspace_uid,
                gid: self.config.workspace_gid,
            };
            let archive =
                archive::host_dir(owner, Path::new(source_dir), self.config.excluded_dirs.clone())
                    .await?;
            self.runtime
                .upload_archive(container_id, &self.config.workspace_dir, archive)
                .await?;
            info!("Copied template files from {} into {}", source_dir, container_id);
        }

        self.files.scan_workspace(container_id, &project.id).await?;

        let mut container = Container::new(
            container_id.to_string(),
            project.id.clone(),
            template.id.clone(),
            host_port,
            internal_port,
        );
        container.mark_started();
        self.containers.insert(&container).await?;

        Ok(container)
    }

    /// Start a container
    pub async fn start(&self, container_id: &str) -> Result<Container> {
        let mut container = self.live_record(container_id).await?;

        let Some(info) = self.runtime.inspect_container(&container.id).await? else {
            self.record_vanished(&container).await?;
            return Err(Error::ContainerNotFound(container_id.to_string()));
        };

        if info.is_running() {
            if reconcile(&mut container, ContainerStatus::Running) {
                self.containers.update(&container).await?;
            }
            return Ok(container);
        }

        match self.runtime.start_container(&container.id).await {
            Ok(()) => {
                container.mark_started();
                self.containers.update(&container).await?;
                info!("Container {} started", container.id);
                Ok(container)
            }
            Err(e) => {
                error!("Failed to start container {}: {}", container.id, e);
                container.transition_to(ContainerStatus::Error);
                if let Err(db) = self.containers.update(&container).await {
                    warn!("Failed to record error state of {}: {}", container.id, db);
                }
                Err(e)
            }
        }
    }

    /// Stop a container. A container the runtime no longer knows counts as stopped.
    pub async fn stop(&self, container_id: &str, timeout_secs: Option<i64>) -> Result<Container> {
        let mut container = self.record(container_id).await?;
        if container.is_deleted() {
            return Ok(container);
        }

        let timeout = timeout_secs.unwrap_or(self.config.stop_timeout);

        if self.runtime.inspect_container(&container.id).await?.is_some() {
            self.runtime.stop_container(&container.id, timeout).await?;
        } else {
            warn!(
                "Container {} is gone from the runtime, recording it as stopped",
                container.id
            );
        }

        container.mark_stopped();
        self.containers.update(&container).await?;
        info!("Container {} stopped", container.id);
        Ok(container)
    }

    /// Delete a container. Always ends with the record marked deleted.
    pub async fn delete(&self, container_id: &str, force: bool) -> Result<Container> {
        let container = self.record(container_id).await?;

        if let Err(e) = self.runtime.remove_container(&container.id, force).await {
            warn!("Failed to remove container {}: {}", container.id, e);
        }

        if !container.is_deleted() {
            self.containers.mark_deleted(&container.id).await?;
            info!("Container {} deleted", container.id);
        }

        self.containers.get(&container.id).await
    }

    /// Current status, reconciled against the runtime
    pub async fn status(&self, container_id: &str) -> Result<Container> {
        let mut container = self.record(container_id).await?;
        if container.is_deleted() {
            return Ok(container);
        }

        let Some(info) = self.runtime.inspect_container(&container.id).await? else {
            self.record_vanished(&container).await?;
            return self.containers.get(&container.id).await;
        };

        let observed = match info.state {
            RuntimeState::Running => ContainerStatus::Running,
            RuntimeState::Exited => ContainerStatus::Stopped,
            RuntimeState::Other => {
                // reported only, never persisted
                container.status = ContainerStatus::Unknown;
                return Ok(container);
            }
        };

        if reconcile(&mut container, observed) {
            warn!(
                "Container {} reconciled to {} from runtime state",
                container.id, container.status
            );
            self.containers.update(&container).await?;
        }

        Ok(container)
    }

    /// Routable preview location of a running container
    pub async fn preview(&self, container_id: &str, request: &PreviewRequest) -> Result<PreviewDetails> {
        let container = self.record(container_id).await?;

        let host_port = match (container.status, container.host_port) {
            (ContainerStatus::Running | ContainerStatus::Creating, Some(port)) => port,
            _ => {
                return Err(Error::InvalidContainerState {
                    expected: ContainerStatus::Running.to_string(),
                    actual: container.status.to_string(),
                })
            }
        };

        let host = self
            .config
            .public_host
            .clone()
            .or_else(|| request.host.clone())
            .unwrap_or_else(|| "localhost".to_string());

        let protocol = self
            .config
            .public_protocol
            .clone()
            .or_else(|| {
                request
                    .forwarded_proto
                    .as_deref()
                    .and_then(|p| p.split(',').next())
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
            })
            .unwrap_or_else(|| {
                if is_local_host(&host) {
                    "http".to_string()
                } else {
                    "https".to_string()
                }
            });

        Ok(PreviewDetails {
            url: format!("{}://{}/preview/container/{}/", protocol, host, host_port),
            container_id: container.id,
            host_port,
        })
    }

    async fn record(&self, container_id: &str) -> Result<Container> {
        self.containers
            .find_by_id_or_prefix(container_id)
            .await?
            .ok_or_else(|| Error::ContainerNotFound(container_id.to_string()))
    }

    /// Record that is not deleted
    async fn live_record(&self, container_id: &str) -> Result<Container> {
        let container = self.record(container_id).await?;
        if container.is_deleted() {
            return Err(Error::ContainerNotFound(container_id.to_string()));
        }
        Ok(container)
    }

    async fn record_vanished(&self, container: &Container) -> Result<()> {
        warn!(
            "Container {} is gone from the runtime, marking it deleted",
            container.id
        );
        self.containers.mark_deleted(&container.id).await
    }
}

/// Move a record to an observed status, stamping timestamps that were never set
fn reconcile(container: &mut Container, observed: ContainerStatus) -> bool {
    if container.status == observed || !container.transition_to(observed) {
        return false;
    }
    match observed {
        ContainerStatus::Running if container.started_at.is_none() => {
            container.started_at = Some(container.updated_at);
        }
        ContainerStatus::Stopped if container.stopped_at.is_none() => {
            container.stopped_at = Some(container.updated_at);
        }
        _ => {}
    }
    true
}

fn is_local_host(host: &str) -> bool {
    let name = if host.starts_with('[') {
        host.split(']').next().map(|h| format!("{}]", h)).unwrap_or_default()
    } else {
        host.split(':').next().unwrap_or(host).to_string()
    };
    LOCAL_HOSTS.contains(&name.as_str()) || name.ends_with(".localhost")
}
