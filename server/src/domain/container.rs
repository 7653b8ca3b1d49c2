//! Container domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    /// Container is being provisioned
    Creating,
    /// Container is running
    Running,
    /// Container exists but is not running
    Stopped,
    /// The last operation on the container failed
    Error,
    /// Container was removed; the row is kept for history
    Deleted,
    /// Runtime reported a state we do not track. Reported only, never persisted.
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Creating => "CREATING",
            ContainerStatus::Running => "RUNNING",
            ContainerStatus::Stopped => "STOPPED",
            ContainerStatus::Error => "ERROR",
            ContainerStatus::Deleted => "DELETED",
            ContainerStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATING" => Some(ContainerStatus::Creating),
            "RUNNING" => Some(ContainerStatus::Running),
            "STOPPED" => Some(ContainerStatus::Stopped),
            "ERROR" => Some(ContainerStatus::Error),
            "DELETED" => Some(ContainerStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container entity. The id is the runtime-assigned container id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub project_id: String,
    pub template_id: String,
    pub status: ContainerStatus,
    pub host_port: Option<u16>,
    pub internal_port: u16,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Container {
    /// Create a new container record
    pub fn new(
        id: String,
        project_id: String,
        template_id: String,
        host_port: u16,
        internal_port: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            template_id,
            status: ContainerStatus::Creating,
            host_port: Some(host_port),
            internal_port,
            created_at: now,
            started_at: None,
            stopped_at: None,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ContainerStatus::Deleted
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Transition to a new status.
    ///
    /// DELETED is terminal, nothing moves back to CREATING and UNKNOWN is
    /// never stored. Everything else is allowed because reconciliation
    /// follows whatever the runtime reports.
    pub fn transition_to(&mut self, new_status: ContainerStatus) -> bool {
        let valid_transition = match (self.status, new_status) {
            (ContainerStatus::Deleted, _) => false,
            (_, ContainerStatus::Creating) | (_, ContainerStatus::Unknown) => false,
            _ => true,
        };

        if valid_transition {
            self.status = new_status;
            self.updated_at = Utc::now();
        }

        valid_transition
    }

    /// Record a successful start
    pub fn mark_started(&mut self) -> bool {
        if self.transition_to(ContainerStatus::Running) {
            self.started_at = Some(self.updated_at);
            true
        } else {
            false
        }
    }

    /// Record a stop
    pub fn mark_stopped(&mut self) -> bool {
        if self.transition_to(ContainerStatus::Stopped) {
            self.stopped_at = Some(self.updated_at);
            true
        } else {
            false
        }
    }
}

/// Whether `create_or_retrieve` provisioned a new sandbox or reused one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Retrieved,
}

/// Response payload for a provisioned container
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub container_id: String,
    pub status: ContainerStatus,
    pub host_port: Option<u16>,
}

impl From<&Container> for ContainerSummary {
    fn from(container: &Container) -> Self {
        Self {
            container_id: container.id.clone(),
            status: container.status,
            host_port: container.host_port,
        }
    }
}

/// Routable preview location for a running container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewDetails {
    pub container_id: String,
    pub host_port: u16,
    pub url: String,
}
