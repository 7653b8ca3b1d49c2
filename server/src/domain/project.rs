//! Project and template domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project entity
///
/// A project owns one file tree and at most one active container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub template_id: String,
    /// Currently linked container, if any
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a project
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectParams {
    pub name: String,
    pub description: Option<String>,
    pub template_id: String,
}

/// Template entity
///
/// A template describes the image a project container is created from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub internal_port: Option<u16>,
    pub start_command: Option<String>,
    /// Host directory whose files seed new workspaces
    pub source_dir: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Image and internal port, or `None` when the template cannot back a container
    pub fn runtime_spec(&self) -> Option<(&str, u16)> {
        match (self.image.as_deref(), self.internal_port) {
            (Some(image), Some(port)) if !image.is_empty() && port > 0 => Some((image, port)),
            _ => None,
        }
    }
}

/// Parameters for creating a template
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateParams {
    pub name: String,
    pub image: Option<String>,
    pub internal_port: Option<u16>,
    pub start_command: Option<String>,
    pub source_dir: Option<String>,
}
