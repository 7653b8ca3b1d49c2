//! Filesystem synchronization service
//!
//! Keeps the stored file tree of each project consistent with the live
//! workspace of its container. Watcher events push changes in; reads pull
//! content lazily; writes, renames, creates and deletes go to the database
//! first and are then mirrored into the container on a best-effort basis.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info, warn};

use crate::domain::file_node::{
    build_tree, CreateFileParams, FileNode, FileTreeNode, NewFileNode, ScannedEntry,
};
use crate::domain::path::{self, ROOT_PATH};
use crate::domain::types::{FsEventKind, ServerMessage, WatcherEvent};
use crate::error::{Error, Result};
use crate::infra::archive::{self, EntryOwner};
use crate::infra::file_repository::FileRepository;
use crate::infra::project_repository::ProjectRepository;
use crate::infra::runtime::{ContainerRuntime, ExecOpts};
use crate::infra::sqlite::ContainerRepository;
use crate::service::hub::SessionHub;
use crate::Config;

/// Walks the workspace and prints one line per entry:
/// `d<TAB>base64(path)<TAB>-` for directories, `f<TAB>base64(path)<TAB>base64(content)`
/// for files up to the size limit and `f<TAB>base64(path)<TAB>-` for larger ones.
///
/// Arguments: workspace root, size limit, excluded directory names.
const SCAN_SCRIPT: &str = r#"
root="$1"; limit="$2"; shift 2
n=$#
for name in "$@"; do
  set -- "$@" -o -name "$name"
done
shift "$n"
if [ $# -gt 0 ]; then shift; else set -- -name ''; fi
find "$root" -mindepth 1 \( -type d \( "$@" \) -prune \) -o -print | while IFS= read -r p; do
  [ -L "$p" ] && continue
  enc=$(printf '%s' "$p" | base64 | tr -d '\n')
  if [ -d "$p" ]; then
    printf 'd\t%s\t-\n' "$enc"
  elif [ -f "$p" ]; then
    size=$(wc -c < "$p" 2>/dev/null | tr -d ' ')
    if [ -n "$size" ] && [ "$size" -le "$limit" ]; then
      body=$(base64 < "$p" | tr -d '\n')
      printf 'f\t%s\t%s\n' "$enc" "$body"
    else
      printf 'f\t%s\t-\n' "$enc"
    fi
  fi
done
"#;

/// Parse the output of [`SCAN_SCRIPT`] into normalized entries
pub fn parse_scan_output(workspace_root: &str, output: &str) -> Result<Vec<ScannedEntry>> {
    let mut entries = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.splitn(3, '\t');
        let (Some(kind), Some(encoded_path), Some(body)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::ScanFailed(format!("malformed line: {}", line)));
        };

        let raw_path = STANDARD
            .decode(encoded_path)
            .map_err(|e| Error::ScanFailed(format!("bad path encoding: {}", e)))?;
        let path = path::normalize(workspace_root, &String::from_utf8_lossy(&raw_path));
        if path == ROOT_PATH {
            continue;
        }

        let entry = match kind {
            "d" => ScannedEntry {
                path,
                is_directory: true,
                content: None,
            },
            "f" => {
                let content = if body == "-" {
                    None
                } else {
                    let bytes = STANDARD
                        .decode(body)
                        .map_err(|e| Error::ScanFailed(format!("bad content encoding: {}", e)))?;
                    // binary files stay lazy
                    String::from_utf8(bytes).ok()
                };
                ScannedEntry {
                    path,
                    is_directory: false,
                    content,
                }
            }
            other => {
                return Err(Error::ScanFailed(format!("unknown entry kind: {}", other)));
            }
        };
        entries.push(entry);
    }

    Ok(entries)
}

/// Filesystem synchronization service
pub struct FileSyncService {
    files: Arc<FileRepository>,
    containers: Arc<ContainerRepository>,
    projects: Arc<ProjectRepository>,
    runtime: Arc<dyn ContainerRuntime>,
    hub: Arc<SessionHub>,
    config: Arc<Config>,
}

impl FileSyncService {
    /// Create a new filesystem synchronization service
    pub fn new(
        files: Arc<FileRepository>,
        containers: Arc<ContainerRepository>,
        projects: Arc<ProjectRepository>,
        runtime: Arc<dyn ContainerRuntime>,
        hub: Arc<SessionHub>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            files,
            containers,
            projects,
            runtime,
            hub,
            config,
        }
    }

    fn workspace_root(&self) -> &str {
        &self.config.workspace_dir
    }

    fn root_name(&self) -> &str {
        match path::file_name(self.workspace_root().trim_end_matches('/')) {
            "" => "workspace",
            name => name,
        }
    }

    fn owner(&self) -> EntryOwner {
        EntryOwner {
            uid: self.config.workspace_uid,
            gid: self.config.workspace_gid,
        }
    }

    fn container_path(&self, path: &str) -> String {
        path::to_container_path(self.workspace_root(), path)
    }

    /// Id of the project's container if the database records it as running
    async fn running_container(&self, project_id: &str) -> Result<Option<String>> {
        Ok(self
            .containers
            .find_by_project(project_id)
            .await?
            .filter(|c| c.is_running())
            .map(|c| c.id))
    }

    /// Apply a watcher event. Returns false when the container is unknown.
    pub async fn apply_watcher_event(&self, event: WatcherEvent) -> Result<bool> {
        let container = match self
            .containers
            .find_by_id_or_prefix(&event.container_id)
            .await?
        {
            Some(container) if !container.is_deleted() => container,
            _ => {
                debug!(
                    "Ignoring {:?} event for unknown container {}",
                    event.event, event.container_id
                );
                return Ok(false);
            }
        };

        let path = path::normalize(self.workspace_root(), &event.path);
        let is_directory = event.node_kind.is_directory();
        let project_id = container.project_id.as_str();

        let node = match event.event {
            FsEventKind::Create => Some(self.apply_create(project_id, &path, is_directory).await?),
            FsEventKind::Delete => {
                self.apply_delete(project_id, &path).await?;
                None
            }
            FsEventKind::Modify => {
                self.apply_modify(project_id, &path).await?;
                None
            }
        };

        debug!(
            "Applied {:?} {:?} {} for container {}",
            event.event, event.node_kind, path, container.id
        );

        self.hub.broadcast_room(
            &container.id,
            &ServerMessage::FilesystemUpdate {
                container_id: container.id.clone(),
                event: event.event,
                node_kind: event.node_kind,
                path,
                node,
            },
        );

        Ok(true)
    }

    /// Parent for a new node: the directory at the parent path, else the root node
    async fn resolve_parent(&self, project_id: &str, path: &str) -> Result<Option<String>> {
        if path == ROOT_PATH {
            return Ok(None);
        }

        let parent_path = path::parent(path);
        if let Some(parent) = self.files.find_by_path(project_id, &parent_path).await? {
            if parent.is_directory {
                return Ok(Some(parent.id));
            }
        }

        Ok(self
            .files
            .find_by_path(project_id, ROOT_PATH)
            .await?
            .filter(|root| root.is_directory)
            .map(|root| root.id))
    }

    async fn apply_create(&self, project_id: &str, path: &str, is_directory: bool) -> Result<FileNode> {
        if let Some(existing) = self.files.find_by_path(project_id, path).await? {
            return self.files.touch(&existing.id, Some(is_directory), true).await;
        }

        let parent_id = self.resolve_parent(project_id, path).await?;
        let name = if path == ROOT_PATH {
            self.root_name().to_string()
        } else {
            path::file_name(path).to_string()
        };

        let inserted = self
            .files
            .insert(NewFileNode {
                project_id: project_id.to_string(),
                parent_id,
                name,
                path: path.to_string(),
                is_directory,
                content: None,
            })
            .await;

        match inserted {
            Ok(node) => Ok(node),
            // lost a race with a concurrent event for the same path
            Err(Error::FileAlreadyExists(_)) => {
                let existing = self
                    .files
                    .find_by_path(project_id, path)
                    .await?
                    .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
                self.files.touch(&existing.id, Some(is_directory), true).await
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_delete(&self, project_id: &str, path: &str) -> Result<u64> {
        match self.files.find_by_path(project_id, path).await? {
            Some(node) => self.files.delete_tree(&node.id).await,
            None => Ok(0),
        }
    }

    async fn apply_modify(&self, project_id: &str, path: &str) -> Result<Option<FileNode>> {
        match self.files.find_by_path(project_id, path).await? {
            Some(node) => {
                let clear = !node.is_directory;
                Ok(Some(self.files.touch(&node.id, None, clear).await?))
            }
            None => Ok(None),
        }
    }

    /// Content of a file, fetched from the live container when not stored
    pub async fn read_content(&self, file_id: &str) -> Result<String> {
        let node = self.files.get(file_id).await?;
        if node.is_directory {
            return Err(Error::InvalidPath(format!("{} is a directory", node.path)));
        }
        if let Some(content) = node.content {
            return Ok(content);
        }

        let Some(container_id) = self.running_container(&node.project_id).await? else {
            debug!("No running container for {}, returning empty content", node.path);
            return Ok(String::new());
        };

        let target = self.container_path(&node.path);
        let result = self
            .runtime
            .exec(
                &container_id,
                ExecOpts::new(["cat", "--", target.as_str()]).user(&self.config.shell_user),
            )
            .await;

        match result {
            Ok(output) if output.success() && output.stdout_lossy => {
                // caching the replacement characters would write them back on the next save
                debug!("{} is not valid UTF-8, leaving its content unstored", node.path);
                Ok(output.stdout)
            }
            Ok(output) if output.success() => {
                if let Err(e) = self.files.update_content(&node.id, &output.stdout).await {
                    warn!("Failed to store fetched content of {}: {}", node.path, e);
                }
                Ok(output.stdout)
            }
            Ok(output) => {
                warn!(
                    "Reading {} in container {} exited with {}: {}",
                    target,
                    container_id,
                    output.exit_code,
                    output.stderr.trim()
                );
                Ok(String::new())
            }
            Err(e) => {
                warn!("Reading {} in container {} failed: {}", target, container_id, e);
                Ok(String::new())
            }
        }
    }

    /// Store new content, then mirror it into the live container
    pub async fn write_content(&self, file_id: &str, content: &str) -> Result<FileNode> {
        let node = self.files.update_content(file_id, content).await?;

        if let Some(container_id) = self.running_container(&node.project_id).await? {
            self.push_file(&container_id, &node.path, content.as_bytes())
                .await;
        }

        Ok(node)
    }

    /// Rename a node and everything below it
    pub async fn rename(&self, file_id: &str, new_name: &str) -> Result<FileNode> {
        if !path::is_valid_name(new_name) {
            return Err(Error::InvalidParameter(format!("invalid name: {}", new_name)));
        }

        let (node, old_path) = self.files.rename_tree(file_id, new_name).await?;
        info!("Renamed {} to {} in project {}", old_path, node.path, node.project_id);

        if let Some(container_id) = self.running_container(&node.project_id).await? {
            let from = self.container_path(&old_path);
            let to = self.container_path(&node.path);
            self.mirror(
                &container_id,
                &node.path,
                ExecOpts::new(["mv", "--", from.as_str(), to.as_str()]),
            )
            .await;
        }

        Ok(node)
    }

    /// Create a file or directory through the API
    pub async fn create_node(&self, project_id: &str, params: CreateFileParams) -> Result<FileNode> {
        self.projects.get(project_id).await?;

        if !path::is_valid_name(&params.name) {
            return Err(Error::InvalidParameter(format!("invalid name: {}", params.name)));
        }

        let parent_path = path::normalize(
            self.workspace_root(),
            params.parent_path.as_deref().unwrap_or(ROOT_PATH),
        );
        if parent_path == ROOT_PATH {
            // trees of projects without a container have no root yet
            self.files
                .insert_scanned(project_id, self.root_name(), Vec::new())
                .await?;
        }

        let parent = self
            .files
            .find_by_path(project_id, &parent_path)
            .await?
            .ok_or_else(|| Error::FileNotFound(parent_path.clone()))?;
        if !parent.is_directory {
            return Err(Error::NotADirectory(parent_path));
        }

        let node = self
            .files
            .insert(NewFileNode {
                project_id: project_id.to_string(),
                parent_id: Some(parent.id),
                name: params.name.clone(),
                path: path::join(&parent_path, &params.name),
                is_directory: params.is_directory,
                content: if params.is_directory {
                    None
                } else {
                    Some(params.content.unwrap_or_default())
                },
            })
            .await?;

        if let Some(container_id) = self.running_container(project_id).await? {
            if node.is_directory {
                let target = self.container_path(&node.path);
                self.mirror(
                    &container_id,
                    &node.path,
                    ExecOpts::new(["mkdir", "-p", "--", target.as_str()])
                        .user(&self.config.shell_user),
                )
                .await;
            } else {
                let content = node.content.clone().unwrap_or_default();
                self.push_file(&container_id, &node.path, content.as_bytes())
                    .await;
            }
        }

        Ok(node)
    }

    /// Delete a node and everything below it. Returns the number of removed nodes.
    pub async fn delete_node(&self, file_id: &str) -> Result<u64> {
        let node = self.files.get(file_id).await?;
        if node.path == ROOT_PATH {
            return Err(Error::InvalidPath("the workspace root cannot be deleted".to_string()));
        }

        let removed = self.files.delete_tree(&node.id).await?;
        info!("Deleted {} ({} node(s)) in project {}", node.path, removed, node.project_id);

        if let Some(container_id) = self.running_container(&node.project_id).await? {
            let target = self.container_path(&node.path);
            self.mirror(
                &container_id,
                &node.path,
                ExecOpts::new(["rm", "-rf", "--", target.as_str()]),
            )
            .await;
        }

        Ok(removed)
    }

    /// Nested file tree of a project
    pub async fn tree(&self, project_id: &str) -> Result<Vec<FileTreeNode>> {
        self.projects.get(project_id).await?;
        Ok(build_tree(self.files.list_by_project(project_id).await?))
    }

    /// Initial filesystem message for a gateway client
    pub async fn initial_filesystem(&self, container_id: &str) -> Result<ServerMessage> {
        let container = self
            .containers
            .find_by_id_or_prefix(container_id)
            .await?
            .ok_or_else(|| Error::ContainerNotFound(container_id.to_string()))?;

        let tree = build_tree(self.files.list_by_project(&container.project_id).await?);
        Ok(ServerMessage::InitialFilesystem {
            container_id: container.id,
            project_id: container.project_id,
            tree,
        })
    }

    /// Enumerate the live workspace and record it. Returns the number of new nodes.
    pub async fn scan_workspace(&self, container_id: &str, project_id: &str) -> Result<usize> {
        let limit = self.config.inline_content_limit.to_string();
        let mut cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            SCAN_SCRIPT.to_string(),
            "sh".to_string(),
            self.workspace_root().to_string(),
            limit,
        ];
        cmd.extend(self.config.excluded_dirs.iter().cloned());

        let output = self
            .runtime
            .exec(container_id, ExecOpts::new(cmd))
            .await?;

        if !output.success() {
            if output.stdout.trim().is_empty() {
                return Err(Error::ScanFailed(format!(
                    "exit code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                )));
            }
            // partial listings (unreadable subdirectories) are still usable
            warn!(
                "Workspace scan of {} exited with {}: {}",
                container_id,
                output.exit_code,
                output.stderr.trim()
            );
        }

        let entries = parse_scan_output(self.workspace_root(), &output.stdout)?;
        let scanned = entries.len();
        let inserted = self
            .files
            .insert_scanned(project_id, self.root_name(), entries)
            .await?;

        info!(
            "Scanned workspace of container {}: {} entries, {} new node(s)",
            container_id, scanned, inserted
        );
        Ok(inserted)
    }

    /// Push one file into the workspace, bounded by the mirror timeout
    async fn push_file(&self, container_id: &str, path: &str, content: &[u8]) {
        let rel_path = path.trim_start_matches('/');
        let archive = match archive::single_file(self.owner(), rel_path, content) {
            Ok(archive) => archive,
            Err(e) => {
                warn!("Failed to archive {} for container {}: {}", path, container_id, e);
                return;
            }
        };

        let upload = self
            .runtime
            .upload_archive(container_id, self.workspace_root(), archive);
        match tokio::time::timeout(self.config.mirror_timeout(), upload).await {
            Ok(Ok(())) => debug!("Mirrored {} into container {}", path, container_id),
            Ok(Err(e)) => warn!("Failed to mirror {} into container {}: {}", path, container_id, e),
            Err(_) => warn!("Timed out mirroring {} into container {}", path, container_id),
        }
    }

    /// Run a mirroring command, bounded by the mirror timeout
    async fn mirror(&self, container_id: &str, path: &str, opts: ExecOpts) {
        let exec = self.runtime.exec(container_id, opts);
        match tokio::time::timeout(self.config.mirror_timeout(), exec).await {
            Ok(Ok(output)) if output.success() => {
                debug!("Mirrored {} in container {}", path, container_id)
            }
            Ok(Ok(output)) => warn!(
                "Failed to mirror {} in container {}: exit code {}: {}",
                path,
                container_id,
                output.exit_code,
                output.stderr.trim()
            ),
            Ok(Err(e)) => warn!("Failed to mirror {} in container {}: {}", path, container_id, e),
            Err(_) => warn!("Timed out mirroring {} in container {}", path, container_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CommandResult, NodeKind};
    use crate::service::testing::Harness;
    use tokio::sync::mpsc;

    fn event(container_id: &str, kind: FsEventKind, node_kind: NodeKind, path: &str) -> WatcherEvent {
        WatcherEvent {
            container_id: container_id.to_string(),
            event: kind,
            node_kind,
            path: path.to_string(),
        }
    }

    fn encode(s: &str) -> String {
        STANDARD.encode(s)
    }

    #[test]
    fn test_parse_scan_output() {
        let output = format!(
            "d\t{}\t-\nf\t{}\t{}\nf\t{}\t-\nf\t{}\t\n",
            encode("/workspace/src"),
            encode("/workspace/src/main.rs"),
            encode("fn main() {}"),
            encode("/workspace/big.bin"),
            encode("/workspace/empty.txt"),
        );
        let entries = parse_scan_output("/workspace", &output).unwrap();

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].path, "/src");
        assert!(entries[0].is_directory);
        assert_eq!(entries[1].content.as_deref(), Some("fn main() {}"));
        assert_eq!(entries[2].content, None);
        assert_eq!(entries[3].content.as_deref(), Some(""));
    }

    #[test]
    fn test_parse_scan_output_rejects_garbage() {
        assert!(matches!(
            parse_scan_output("/workspace", "this is not a listing"),
            Err(Error::ScanFailed(_))
        ));
        assert!(matches!(
            parse_scan_output("/workspace", "x\tL3dvcmtzcGFjZS9h\t-"),
            Err(Error::ScanFailed(_))
        ));
        assert!(parse_scan_output("/workspace", "\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_binary_content_stays_lazy() {
        let body = STANDARD.encode([0xff, 0xfe, 0x00]);
        let output = format!("f\t{}\t{}", encode("/workspace/img.png"), body);
        let entries = parse_scan_output("/workspace", &output).unwrap();
        assert_eq!(entries[0].content, None);
    }

    #[tokio::test]
    async fn test_watcher_create_links_under_root_and_broadcasts() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.hub.register("client", tx);
        h.hub.join(&container_id, "client");

        let applied = h
            .files
            .apply_watcher_event(event(&container_id, FsEventKind::Create, NodeKind::File, "/workspace/a.txt"))
            .await
            .unwrap();
        assert!(applied);

        let root = h.file_repo.find_by_path(&project.id, "/").await.unwrap().unwrap();
        let node = h.file_repo.find_by_path(&project.id, "/a.txt").await.unwrap().unwrap();
        assert_eq!(node.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(node.content, None);

        match rx.try_recv().unwrap() {
            ServerMessage::FilesystemUpdate { event, path, node, .. } => {
                assert_eq!(event, FsEventKind::Create);
                assert_eq!(path, "/a.txt");
                assert_eq!(node.unwrap().path, "/a.txt");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_does_not_duplicate() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;

        for _ in 0..2 {
            h.files
                .apply_watcher_event(event(&container_id, FsEventKind::Create, NodeKind::Directory, "/workspace/src"))
                .await
                .unwrap();
        }

        let nodes = h.file_repo.list_by_project(&project.id).await.unwrap();
        assert_eq!(nodes.iter().filter(|n| n.path == "/src").count(), 1);
    }

    #[tokio::test]
    async fn test_orphan_create_falls_back_to_root() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;

        h.files
            .apply_watcher_event(event(&container_id, FsEventKind::Create, NodeKind::File, "/workspace/missing/dir/x.txt"))
            .await
            .unwrap();

        let root = h.file_repo.find_by_path(&project.id, "/").await.unwrap().unwrap();
        let node = h
            .file_repo
            .find_by_path(&project.id, "/missing/dir/x.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.parent_id.as_deref(), Some(root.id.as_str()));
    }

    #[tokio::test]
    async fn test_modify_forces_live_fetch() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;
        h.runtime.on_exec(|_, opts| {
            assert_eq!(opts.cmd[0], "cat");
            Ok(CommandResult {
                exit_code: 0,
                stdout: "fresh".to_string(),
                stderr: String::new(),
                ..Default::default()
            })
        });

        let node = h
            .files
            .create_node(
                &project.id,
                CreateFileParams {
                    parent_path: None,
                    name: "a.txt".to_string(),
                    is_directory: false,
                    content: Some("stale".to_string()),
                },
            )
            .await
            .unwrap();

        h.files
            .apply_watcher_event(event(&container_id, FsEventKind::Modify, NodeKind::File, "/workspace/a.txt"))
            .await
            .unwrap();
        assert_eq!(h.file_repo.get(&node.id).await.unwrap().content, None);

        assert_eq!(h.files.read_content(&node.id).await.unwrap(), "fresh");
        assert_eq!(
            h.file_repo.get(&node.id).await.unwrap().content.as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn test_binary_fetch_is_not_cached() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;
        h.runtime.on_exec(|_, _| {
            Ok(CommandResult {
                exit_code: 0,
                stdout: "\u{fffd}PNG".to_string(),
                stdout_lossy: true,
                ..Default::default()
            })
        });

        h.files
            .apply_watcher_event(event(&container_id, FsEventKind::Create, NodeKind::File, "/workspace/logo.png"))
            .await
            .unwrap();
        let node = h
            .file_repo
            .find_by_path(&project.id, "/logo.png")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.files.read_content(&node.id).await.unwrap(), "\u{fffd}PNG");
        assert_eq!(h.file_repo.get(&node.id).await.unwrap().content, None);

        h.files.read_content(&node.id).await.unwrap();
        let fetches = h
            .runtime
            .execs()
            .iter()
            .filter(|(_, opts)| opts.cmd[0] == "cat")
            .count();
        assert_eq!(fetches, 2);
    }

    #[tokio::test]
    async fn test_write_then_read_skips_container() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;

        h.files
            .apply_watcher_event(event(&container_id, FsEventKind::Create, NodeKind::File, "/workspace/src/app.js"))
            .await
            .unwrap();
        let node = h
            .file_repo
            .find_by_path(&project.id, "/src/app.js")
            .await
            .unwrap()
            .unwrap();

        h.files.write_content(&node.id, "let x = 1;").await.unwrap();
        let execs_before = h.runtime.execs().len();
        assert_eq!(h.files.read_content(&node.id).await.unwrap(), "let x = 1;");
        assert_eq!(h.runtime.execs().len(), execs_before);

        let uploads = h.runtime.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, container_id);
        assert_eq!(uploads[0].1, "/workspace");
    }

    #[tokio::test]
    async fn test_read_without_container_is_empty() {
        let h = Harness::new().await;
        let project = h.project().await;
        let node = h
            .files
            .create_node(
                &project.id,
                CreateFileParams {
                    parent_path: None,
                    name: "a.txt".to_string(),
                    is_directory: false,
                    content: None,
                },
            )
            .await
            .unwrap();
        h.file_repo.touch(&node.id, None, true).await.unwrap();

        assert_eq!(h.files.read_content(&node.id).await.unwrap(), "");
        assert_eq!(h.file_repo.get(&node.id).await.unwrap().content, None);
        assert!(h.runtime.execs().is_empty());
    }

    #[tokio::test]
    async fn test_delete_event_removes_subtree() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;

        for (kind, path) in [
            (NodeKind::Directory, "/workspace/src"),
            (NodeKind::Directory, "/workspace/src/lib"),
            (NodeKind::File, "/workspace/src/lib/a.rs"),
            (NodeKind::File, "/workspace/src/b.rs"),
            (NodeKind::File, "/workspace/keep.txt"),
        ] {
            h.files
                .apply_watcher_event(event(&container_id, FsEventKind::Create, kind, path))
                .await
                .unwrap();
        }

        h.files
            .apply_watcher_event(event(&container_id, FsEventKind::Delete, NodeKind::Directory, "/workspace/src"))
            .await
            .unwrap();

        let paths: Vec<String> = h
            .file_repo
            .list_by_project(&project.id)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.path)
            .collect();
        assert_eq!(paths, vec!["/".to_string(), "/keep.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_container_is_ignored() {
        let h = Harness::new().await;
        let applied = h
            .files
            .apply_watcher_event(event("nope", FsEventKind::Create, NodeKind::File, "/workspace/a"))
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_rename_mirrors_move_and_detects_conflict() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;

        for path in ["/workspace/a.txt", "/workspace/c.txt"] {
            h.files
                .apply_watcher_event(event(&container_id, FsEventKind::Create, NodeKind::File, path))
                .await
                .unwrap();
        }
        let a = h.file_repo.find_by_path(&project.id, "/a.txt").await.unwrap().unwrap();

        let renamed = h.files.rename(&a.id, "b.txt").await.unwrap();
        assert_eq!(renamed.path, "/b.txt");

        let execs = h.runtime.execs();
        let (_, mv) = execs.last().unwrap();
        assert_eq!(mv.cmd, vec!["mv", "--", "/workspace/a.txt", "/workspace/b.txt"]);

        assert!(matches!(
            h.files.rename(&a.id, "c.txt").await,
            Err(Error::FileAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_create_node_conflict_and_mirror() {
        let h = Harness::new().await;
        let (project, _) = h.running_project().await;

        let params = CreateFileParams {
            parent_path: Some("/".to_string()),
            name: "src".to_string(),
            is_directory: true,
            content: None,
        };
        h.files.create_node(&project.id, params.clone()).await.unwrap();

        let execs = h.runtime.execs();
        assert_eq!(execs.last().unwrap().1.cmd, vec!["mkdir", "-p", "--", "/workspace/src"]);

        assert!(matches!(
            h.files.create_node(&project.id, params).await,
            Err(Error::FileAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_records_workspace() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;
        let listing = format!(
            "d\t{}\t-\nf\t{}\t{}\n",
            encode("/workspace/pages"),
            encode("/workspace/pages/index.tsx"),
            encode("export default 1")
        );
        h.runtime.on_exec(move |_, _| {
            Ok(CommandResult {
                exit_code: 0,
                stdout: listing.clone(),
                stderr: String::new(),
                ..Default::default()
            })
        });

        h.files.scan_workspace(&container_id, &project.id).await.unwrap();

        let index = h
            .file_repo
            .find_by_path(&project.id, "/pages/index.tsx")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(index.content.as_deref(), Some("export default 1"));

        let tree = h.files.tree(&project.id).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].name, "pages");
    }

    #[tokio::test]
    async fn test_scan_failure_is_fatal() {
        let h = Harness::new().await;
        let (project, container_id) = h.running_project().await;
        h.runtime.on_exec(|_, _| {
            Ok(CommandResult {
                exit_code: 0,
                stdout: "garbage".to_string(),
                stderr: String::new(),
                ..Default::default()
            })
        });

        assert!(matches!(
            h.files.scan_workspace(&container_id, &project.id).await,
            Err(Error::ScanFailed(_))
        ));
    }
}
