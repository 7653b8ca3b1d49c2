//! Container HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use axum_extra::{headers::Host, TypedHeader};
use serde::{Deserialize, Serialize};

use crate::domain::container::{
    Container, ContainerStatus, ContainerSummary, PreviewDetails, ProvisionOutcome,
};
use crate::service::container::PreviewRequest;
use crate::{AppState, Result};

/// Create-or-retrieve request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    /// Template to provision from; the project's template when omitted
    pub template_id: Option<String>,
}

/// Stop query parameters
#[derive(Debug, Deserialize)]
pub struct StopQuery {
    pub timeout: Option<i64>,
}

/// Delete query parameters
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub force: Option<bool>,
}

/// Container status response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResponse {
    pub container_id: String,
    pub project_id: String,
    pub status: ContainerStatus,
    pub host_port: Option<u16>,
    pub internal_port: u16,
    pub created_at: String,
    pub started_at: Option<String>,
    pub stopped_at: Option<String>,
}

impl From<Container> for ContainerResponse {
    fn from(c: Container) -> Self {
        Self {
            container_id: c.id,
            project_id: c.project_id,
            status: c.status,
            host_port: c.host_port,
            internal_port: c.internal_port,
            created_at: c.created_at.to_rfc3339(),
            started_at: c.started_at.map(|t| t.to_rfc3339()),
            stopped_at: c.stopped_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Provision the project's container or return the live one
pub async fn create_or_retrieve(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Option<Json<ProvisionRequest>>,
) -> Result<(StatusCode, Json<ContainerSummary>)> {
    let template_id = match body.and_then(|Json(req)| req.template_id) {
        Some(id) => id,
        None => state.project_service.get(&project_id).await?.template_id,
    };

    let (container, outcome) = state
        .container_service
        .create_or_retrieve(&project_id, &template_id)
        .await?;

    let status = match outcome {
        ProvisionOutcome::Created => StatusCode::CREATED,
        ProvisionOutcome::Retrieved => StatusCode::OK,
    };
    Ok((status, Json(ContainerSummary::from(&container))))
}

/// Current container status
pub async fn container_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContainerResponse>> {
    let container = state.container_service.status(&id).await?;
    Ok(Json(container.into()))
}

/// Start a container
pub async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContainerResponse>> {
    let container = state.container_service.start(&id).await?;
    Ok(Json(container.into()))
}

/// Stop a container
pub async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<Json<ContainerResponse>> {
    let container = state.container_service.stop(&id, query.timeout).await?;
    Ok(Json(container.into()))
}

/// Delete a container
pub async fn delete_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<ContainerResponse>> {
    let container = state
        .container_service
        .delete(&id, query.force.unwrap_or(true))
        .await?;
    state.terminal_service.teardown(&container.id).await;
    Ok(Json(container.into()))
}

/// Preview URL of a running container
pub async fn preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
    host: Option<TypedHeader<Host>>,
    headers: HeaderMap,
) -> Result<Json<PreviewDetails>> {
    let request = PreviewRequest {
        host: host.map(|TypedHeader(host)| match host.port() {
            Some(port) => format!("{}:{}", host.hostname(), port),
            None => host.hostname().to_string(),
        }),
        forwarded_proto: headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };

    Ok(Json(state.container_service.preview(&id, &request).await?))
}
