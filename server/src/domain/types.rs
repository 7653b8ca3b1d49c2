//! Common domain types and wire messages

use serde::{Deserialize, Serialize};

use crate::domain::file_node::{FileNode, FileTreeNode};

/// Command result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// stdout held bytes that are not valid UTF-8 and was decoded lossily
    #[serde(default)]
    pub stdout_lossy: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Filesystem change reported by the in-container watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsEventKind {
    Create,
    Delete,
    Modify,
}

/// Kind of filesystem entry an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn is_directory(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }
}

/// Watcher callback payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WatcherEvent {
    pub container_id: String,
    pub event: FsEventKind,
    #[serde(rename = "type")]
    pub node_kind: NodeKind,
    pub path: String,
}

/// Messages a client sends over the session gateway.
///
/// Frames are `{"type": "<kebab-case name>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Register { container_id: String },
    TerminalInput { data: String },
    TerminalResize { rows: u16, cols: u16 },
    GetInitialFilesystem { container_id: String },
}

/// Messages the session gateway sends to a client, framed like [`ClientMessage`]
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Registered {
        container_id: String,
    },
    TerminalReady {
        container_id: String,
    },
    TerminalOutput {
        data: String,
    },
    TerminalError {
        message: String,
    },
    InitialFilesystem {
        container_id: String,
        project_id: String,
        tree: Vec<FileTreeNode>,
    },
    FilesystemUpdate {
        container_id: String,
        event: FsEventKind,
        #[serde(rename = "type")]
        node_kind: NodeKind,
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        node: Option<FileNode>,
    },
    FilesystemError {
        container_id: String,
        message: String,
    },
}
