//! Tar archives pushed into project containers
//!
//! Entry paths are relative to the extraction directory (the workspace root)
//! and every entry is owned by the workspace user.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use bytes::Bytes;
use tar::{Builder, EntryType, Header};
use tracing::debug;

use crate::error::{Error, Result};

/// Ownership stamped on every entry
#[derive(Debug, Clone, Copy)]
pub struct EntryOwner {
    pub uid: u64,
    pub gid: u64,
}

pub struct WorkspaceArchive {
    builder: Builder<Vec<u8>>,
    owner: EntryOwner,
    mtime: u64,
}

impl WorkspaceArchive {
    pub fn new(owner: EntryOwner) -> Self {
        let mut builder = Builder::new(Vec::new());
        builder.follow_symlinks(false);
        Self {
            builder,
            owner,
            mtime: chrono::Utc::now().timestamp().max(0) as u64,
        }
    }

    fn header(&self, entry_type: EntryType, mode: u32, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_size(size);
        header.set_uid(self.owner.uid);
        header.set_gid(self.owner.gid);
        header.set_mtime(self.mtime);
        header
    }

    /// Add a directory entry
    pub fn add_dir(&mut self, rel_path: &str) -> Result<()> {
        let mut header = self.header(EntryType::Directory, 0o755, 0);
        self.builder
            .append_data(&mut header, rel_path, std::io::empty())
            .map_err(|e| Error::Internal(format!("Failed to archive {}: {}", rel_path, e)))
    }

    /// Add every missing ancestor directory of `rel_path`
    pub fn add_ancestors(&mut self, rel_path: &str) -> Result<()> {
        let segments: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
        for depth in 1..segments.len() {
            self.add_dir(&segments[..depth].join("/"))?;
        }
        Ok(())
    }

    /// Add a regular file entry
    pub fn add_file(&mut self, rel_path: &str, content: &[u8], mode: u32) -> Result<()> {
        let mut header = self.header(EntryType::Regular, mode, content.len() as u64);
        self.builder
            .append_data(&mut header, rel_path, content)
            .map_err(|e| Error::Internal(format!("Failed to archive {}: {}", rel_path, e)))
    }

    /// Add the contents of a host directory below `rel_root`, skipping
    /// excluded directory names, unreadable entries and symlinks
    pub fn add_host_dir(&mut self, dir: &Path, rel_root: &str, excluded: &[String]) -> Result<()> {
        let mut entries: Vec<fs::DirEntry> = match fs::read_dir(dir) {
            Ok(read) => read.filter_map(|e| e.ok()).collect(),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                debug!(path = %dir.display(), "skipping unreadable directory");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel_path = if rel_root.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel_root, name)
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if excluded.iter().any(|x| x == &name) {
                    continue;
                }
                self.add_dir(&rel_path)?;
                self.add_host_dir(&entry.path(), &rel_path, excluded)?;
            } else if file_type.is_file() {
                let content = match fs::read(entry.path()) {
                    Ok(content) => content,
                    Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                        debug!(path = %entry.path().display(), "skipping unreadable file");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
                let mode = entry
                    .metadata()
                    .map(|m| executable_mode(&m))
                    .unwrap_or(0o644);
                self.add_file(&rel_path, &content, mode)?;
            }
        }

        Ok(())
    }

    pub fn finish(self) -> Result<Bytes> {
        let data = self
            .builder
            .into_inner()
            .map_err(|e| Error::Internal(format!("Failed to finish archive: {}", e)))?;
        Ok(Bytes::from(data))
    }
}

#[cfg(unix)]
fn executable_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn executable_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

/// Archive holding one file and its ancestor directories
pub fn single_file(owner: EntryOwner, rel_path: &str, content: &[u8]) -> Result<Bytes> {
    let mut archive = WorkspaceArchive::new(owner);
    archive.add_ancestors(rel_path)?;
    archive.add_file(rel_path, content, 0o644)?;
    archive.finish()
}

/// Archive of a host directory tree, built on the blocking pool
pub async fn host_dir(owner: EntryOwner, dir: &Path, excluded: Vec<String>) -> Result<Bytes> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut archive = WorkspaceArchive::new(owner);
        archive.add_host_dir(&dir, "", &excluded)?;
        archive.finish()
    })
    .await
    .map_err(|e| Error::Internal(format!("Archive task failed: {}", e)))?
}
