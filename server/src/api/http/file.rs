//! File tree HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::file_node::{CreateFileParams, FileNode, FileTreeNode};
use crate::{AppState, Result};

/// File content response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResponse {
    pub file_id: String,
    pub content: String,
}

/// Write content request
#[derive(Debug, Deserialize)]
pub struct WriteContentRequest {
    pub content: String,
}

/// Rename request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub new_name: String,
}

/// Delete response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: u64,
}

/// Nested file tree of a project
pub async fn file_tree(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<FileTreeNode>>> {
    Ok(Json(state.file_service.tree(&project_id).await?))
}

/// Create a file or directory
pub async fn create_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<CreateFileParams>,
) -> Result<(StatusCode, Json<FileNode>)> {
    let node = state.file_service.create_node(&project_id, req).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// Read file content, fetching it from the container when stale
pub async fn read_content(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<ContentResponse>> {
    let content = state.file_service.read_content(&file_id).await?;
    Ok(Json(ContentResponse { file_id, content }))
}

/// Write file content
pub async fn write_content(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Json(req): Json<WriteContentRequest>,
) -> Result<Json<FileNode>> {
    Ok(Json(
        state.file_service.write_content(&file_id, &req.content).await?,
    ))
}

/// Rename a file or directory
pub async fn rename_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<FileNode>> {
    Ok(Json(state.file_service.rename(&file_id, &req.new_name).await?))
}

/// Delete a file or directory recursively
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.file_service.delete_node(&file_id).await?;
    Ok(Json(DeleteResponse { deleted }))
}
