//! Shared wiring for service tests

use std::sync::Arc;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::container::Container;
use crate::domain::project::{CreateProjectParams, CreateTemplateParams, Project, Template};
use crate::infra::fake_runtime::FakeRuntime;
use crate::infra::file_repository::FileRepository;
use crate::infra::project_repository::ProjectRepository;
use crate::infra::runtime::{ContainerRuntime, RuntimeState};
use crate::infra::sqlite::{test_pool, ContainerRepository};
use crate::service::container::ContainerService;
use crate::service::filesystem::FileSyncService;
use crate::service::hub::SessionHub;
use crate::service::project::ProjectService;
use crate::service::terminal::TerminalService;
use crate::{AppState, Config};

pub struct Harness {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub runtime: Arc<FakeRuntime>,
    pub hub: Arc<SessionHub>,
    pub container_repo: Arc<ContainerRepository>,
    pub project_repo: Arc<ProjectRepository>,
    pub file_repo: Arc<FileRepository>,
    pub files: Arc<FileSyncService>,
    pub containers: Arc<ContainerService>,
    pub terminal: Arc<TerminalService>,
    pub projects: Arc<ProjectService>,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = test_pool().await;
        let config = Arc::new(Config::default());
        let runtime = Arc::new(FakeRuntime::new());
        let dyn_runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        let hub = Arc::new(SessionHub::new());

        let container_repo = Arc::new(ContainerRepository::new(pool.clone()));
        let project_repo = Arc::new(ProjectRepository::new(pool.clone()));
        let file_repo = Arc::new(FileRepository::new(pool.clone()));

        let files = Arc::new(FileSyncService::new(
            file_repo.clone(),
            container_repo.clone(),
            project_repo.clone(),
            dyn_runtime.clone(),
            hub.clone(),
            config.clone(),
        ));
        let containers = Arc::new(ContainerService::new(
            container_repo.clone(),
            project_repo.clone(),
            dyn_runtime.clone(),
            files.clone(),
            config.clone(),
        ));
        let terminal = Arc::new(TerminalService::new(
            dyn_runtime.clone(),
            hub.clone(),
            config.clone(),
        ));
        let projects = Arc::new(ProjectService::new(
            project_repo.clone(),
            container_repo.clone(),
            dyn_runtime,
            containers.clone(),
            terminal.clone(),
        ));

        Self {
            pool,
            config,
            runtime,
            hub,
            container_repo,
            project_repo,
            file_repo,
            files,
            containers,
            terminal,
            projects,
        }
    }

    /// Handler state over the same services
    pub fn app_state(&self) -> AppState {
        AppState {
            hub: self.hub.clone(),
            project_service: self.projects.clone(),
            container_service: self.containers.clone(),
            file_service: self.files.clone(),
            terminal_service: self.terminal.clone(),
        }
    }

    /// Container service wired to a different runtime
    pub fn container_service_with(&self, runtime: Arc<dyn ContainerRuntime>) -> ContainerService {
        ContainerService::new(
            self.container_repo.clone(),
            self.project_repo.clone(),
            runtime,
            self.files.clone(),
            self.config.clone(),
        )
    }

    pub async fn template_with(&self, image: Option<&str>, internal_port: Option<u16>) -> Template {
        self.project_repo
            .create_template(CreateTemplateParams {
                name: format!("template-{}", Uuid::new_v4().simple()),
                image: image.map(String::from),
                internal_port,
                start_command: Some("npm run dev".to_string()),
                source_dir: None,
            })
            .await
            .expect("Failed to create template")
    }

    /// A project on a complete node template
    pub async fn project(&self) -> Project {
        let template = self.template_with(Some("node:20"), Some(3000)).await;
        self.project_repo
            .create(CreateProjectParams {
                name: "demo".to_string(),
                description: None,
                template_id: template.id,
            })
            .await
            .expect("Failed to create project")
    }

    /// A project whose container is running at the runtime and recorded as
    /// running, with the workspace root already stored
    pub async fn running_project(&self) -> (Project, String) {
        let project = self.project().await;
        let container_id = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());

        self.runtime.seed_container(
            &container_id,
            &self.config.container_name(&project.id),
            RuntimeState::Running,
        );

        let mut container = Container::new(
            container_id.clone(),
            project.id.clone(),
            project.template_id.clone(),
            32500,
            3000,
        );
        container.mark_started();
        self.container_repo
            .insert(&container)
            .await
            .expect("Failed to insert container");

        self.file_repo
            .insert_scanned(&project.id, "workspace", vec![])
            .await
            .expect("Failed to create root");

        let project = self
            .project_repo
            .get(&project.id)
            .await
            .expect("Failed to reload project");
        (project, container_id)
    }
}
