//! File tree domain model

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One file or directory of a project tree.
///
/// `content == None` on a file means the stored copy is stale and the next
/// read must fetch it from the live container. Directories never carry content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub project_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a node
#[derive(Debug, Clone)]
pub struct NewFileNode {
    pub project_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub content: Option<String>,
}

/// One entry reported by the workspace scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    /// Normalized project-relative path
    pub path: String,
    pub is_directory: bool,
    /// Inline content, only for small text files
    pub content: Option<String>,
}

/// Parameters for creating a node through the API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileParams {
    /// Project-relative directory to create the node in ("/" when omitted)
    pub parent_path: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_directory: bool,
    pub content: Option<String>,
}

/// Nested view of a project tree sent to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTreeNode {
    pub id: String,
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileTreeNode>,
}

/// Build the nested tree from a flat node list.
///
/// Nodes whose parent is missing from the list are promoted to the top level.
/// Directories come before files, then names sort alphabetically.
pub fn build_tree(nodes: Vec<FileNode>) -> Vec<FileTreeNode> {
    let ids: std::collections::HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let mut children: HashMap<Option<String>, Vec<FileNode>> = HashMap::new();
    for node in nodes {
        let key = node.parent_id.clone().filter(|p| ids.contains(p));
        children.entry(key).or_default().push(node);
    }

    fn assemble(
        parent: Option<String>,
        children: &mut HashMap<Option<String>, Vec<FileNode>>,
    ) -> Vec<FileTreeNode> {
        let mut level = children.remove(&parent).unwrap_or_default();
        level.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| a.name.cmp(&b.name))
        });
        level
            .into_iter()
            .map(|node| FileTreeNode {
                children: assemble(Some(node.id.clone()), children),
                id: node.id,
                name: node.name,
                path: node.path,
                is_directory: node.is_directory,
            })
            .collect()
    }

    assemble(None, &mut children)
}
