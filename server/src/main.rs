//! Cloud IDE Workspace Server
//!
//! Provisions one container per project, multiplexes an interactive shell
//! per container over a WebSocket gateway and keeps a stored file tree in
//! step with each container's workspace.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod domain;
mod error;
mod infra;
mod service;

pub use config::Config;
pub use error::{Error, Result};

use infra::docker::DockerManager;
use infra::file_repository::FileRepository;
use infra::project_repository::ProjectRepository;
use infra::runtime::ContainerRuntime;
use infra::sqlite::{self, ContainerRepository};
use service::container::ContainerService;
use service::filesystem::FileSyncService;
use service::hub::SessionHub;
use service::project::ProjectService;
use service::terminal::TerminalService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SessionHub>,
    pub project_service: Arc<ProjectService>,
    pub container_service: Arc<ContainerService>,
    pub file_service: Arc<FileSyncService>,
    pub terminal_service: Arc<TerminalService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::load()?);

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    error::hide_internal_details(config.is_production());

    let http_addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;

    info!("Starting Workspace Server ({})", config.environment);
    info!("HTTP listening on {}", http_addr);

    // Initialize infrastructure
    let pool = sqlite::init(&config.database_url).await?;
    let container_repository = Arc::new(ContainerRepository::new(pool.clone()));
    let project_repository = Arc::new(ProjectRepository::new(pool.clone()));
    let file_repository = Arc::new(FileRepository::new(pool));

    let docker = DockerManager::new(config.docker_socket.as_deref(), config.exec_timeout())?;
    if let Err(e) = docker.ping().await {
        warn!("Docker is not reachable yet: {}", e);
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let hub = Arc::new(SessionHub::new());

    // Initialize services
    let file_service = Arc::new(FileSyncService::new(
        file_repository.clone(),
        container_repository.clone(),
        project_repository.clone(),
        runtime.clone(),
        hub.clone(),
        config.clone(),
    ));

    let container_service = Arc::new(ContainerService::new(
        container_repository.clone(),
        project_repository.clone(),
        runtime.clone(),
        file_service.clone(),
        config.clone(),
    ));

    let terminal_service = Arc::new(TerminalService::new(
        runtime.clone(),
        hub.clone(),
        config.clone(),
    ));

    let project_service = Arc::new(ProjectService::new(
        project_repository,
        container_repository,
        runtime,
        container_service.clone(),
        terminal_service.clone(),
    ));

    let state = AppState {
        hub,
        project_service,
        container_service,
        file_service,
        terminal_service,
    };

    let app = api::http::create_router(state);

    axum::serve(
        tokio::net::TcpListener::bind(http_addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
