//! HTTP API handlers

mod container;
mod file;
mod health;
mod internal;
mod project;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::ws;
use crate::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Template routes
        .route("/templates", post(project::create_template))
        .route("/templates", get(project::list_templates))
        // Project routes
        .route("/projects", post(project::create_project))
        .route("/projects", get(project::list_projects))
        .route("/projects/{id}", get(project::get_project))
        .route("/projects/{id}", delete(project::delete_project))
        .route("/projects/{id}/container", post(container::create_or_retrieve))
        // Container routes
        .route("/containers/{id}", delete(container::delete_container))
        .route("/containers/{id}/status", get(container::container_status))
        .route("/containers/{id}/start", post(container::start_container))
        .route("/containers/{id}/stop", post(container::stop_container))
        .route("/containers/{id}/preview", get(container::preview))
        // File routes
        .route("/projects/{id}/files", get(file::file_tree))
        .route("/projects/{id}/files", post(file::create_file))
        .route("/files/{id}", delete(file::delete_file))
        .route("/files/{id}/content", get(file::read_content))
        .route("/files/{id}/content", put(file::write_content))
        .route("/files/{id}/rename", post(file::rename_file))
        // In-container watcher callback
        .route("/internal/fs-events", post(internal::fs_event))
        // Session gateway
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
