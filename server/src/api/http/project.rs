//! Project and template HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::domain::project::{CreateProjectParams, CreateTemplateParams, Project, Template};
use crate::{AppState, Result};

/// Create a template
pub async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateParams>,
) -> Result<(StatusCode, Json<Template>)> {
    let template = state.project_service.create_template(req).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// List templates
pub async fn list_templates(State(state): State<AppState>) -> Result<Json<Vec<Template>>> {
    Ok(Json(state.project_service.list_templates().await?))
}

/// Create a project
pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectParams>,
) -> Result<(StatusCode, Json<Project>)> {
    let project = state.project_service.create(req).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// List projects
pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<Project>>> {
    Ok(Json(state.project_service.list().await?))
}

/// Get a project by ID
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>> {
    Ok(Json(state.project_service.get(&id).await?))
}

/// Delete a project with its container and files
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.project_service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
