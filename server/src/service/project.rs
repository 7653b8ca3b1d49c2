//! Project and template service

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::project::{CreateProjectParams, CreateTemplateParams, Project, Template};
use crate::error::{Error, Result};
use crate::infra::project_repository::ProjectRepository;
use crate::infra::runtime::ContainerRuntime;
use crate::infra::sqlite::ContainerRepository;
use crate::service::container::ContainerService;
use crate::service::terminal::TerminalService;

/// Project and template service
pub struct ProjectService {
    projects: Arc<ProjectRepository>,
    containers: Arc<ContainerRepository>,
    runtime: Arc<dyn ContainerRuntime>,
    lifecycle: Arc<ContainerService>,
    terminal: Arc<TerminalService>,
}

impl ProjectService {
    /// Create a new project service
    pub fn new(
        projects: Arc<ProjectRepository>,
        containers: Arc<ContainerRepository>,
        runtime: Arc<dyn ContainerRuntime>,
        lifecycle: Arc<ContainerService>,
        terminal: Arc<TerminalService>,
    ) -> Self {
        Self {
            projects,
            containers,
            runtime,
            lifecycle,
            terminal,
        }
    }

    /// Create a project on an existing template
    pub async fn create(&self, params: CreateProjectParams) -> Result<Project> {
        if params.name.trim().is_empty() {
            return Err(Error::InvalidParameter("name must not be empty".to_string()));
        }
        self.projects.get_template(&params.template_id).await?;

        let project = self.projects.create(params).await?;
        info!("Created project {} ({})", project.id, project.name);
        Ok(project)
    }

    pub async fn get(&self, id: &str) -> Result<Project> {
        self.projects.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<Project>> {
        self.projects.list().await
    }

    /// Delete a project, its container and its file tree
    pub async fn delete(&self, id: &str) -> Result<()> {
        let project = self.projects.get(id).await?;

        if let Some(container) = self.containers.find_by_project(&project.id).await? {
            self.terminal.teardown(&container.id).await;
            if let Err(e) = self.runtime.remove_container(&container.id, true).await {
                warn!(
                    "Failed to remove container {} of project {}: {}",
                    container.id, project.id, e
                );
            }
        }

        self.projects.delete(&project.id).await?;
        self.lifecycle.forget_project(&project.id);
        info!("Deleted project {}", project.id);
        Ok(())
    }

    pub async fn create_template(&self, params: CreateTemplateParams) -> Result<Template> {
        if params.name.trim().is_empty() {
            return Err(Error::InvalidParameter("name must not be empty".to_string()));
        }
        if params.internal_port == Some(0) {
            return Err(Error::InvalidParameter(
                "internalPort must be between 1 and 65535".to_string(),
            ));
        }

        let template = self.projects.create_template(params).await?;
        info!("Created template {} ({})", template.id, template.name);
        Ok(template)
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        self.projects.list_templates().await
    }
}
