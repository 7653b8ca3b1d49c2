//! Turn raw notify events into workspace change reports

use std::collections::VecDeque;
use std::path::{Component, Path};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Delete,
    Modify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Body posted to the server's watcher endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeReport {
    pub container_id: String,
    pub event: ChangeKind,
    #[serde(rename = "type")]
    pub entry: EntryKind,
    pub path: String,
}

/// Filters and labels events below one watched root
pub struct Classifier {
    root: std::path::PathBuf,
    container_id: String,
    excludes: Vec<String>,
}

impl Classifier {
    pub fn new(root: impl Into<std::path::PathBuf>, container_id: String, excludes: Vec<String>) -> Self {
        Self {
            root: root.into(),
            container_id,
            excludes,
        }
    }

    /// Whether a path lies inside the root and outside every excluded directory
    fn is_reported(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        !rel.components().any(|c| match c {
            Component::Normal(name) => self.excludes.iter().any(|x| name == x.as_str()),
            _ => false,
        })
    }

    fn report(&self, event: ChangeKind, entry: EntryKind, path: &Path) -> Option<ChangeReport> {
        if !self.is_reported(path) {
            return None;
        }
        Some(ChangeReport {
            container_id: self.container_id.clone(),
            event,
            entry,
            path: path.to_string_lossy().into_owned(),
        })
    }

    /// Create reports for a directory that appeared whole through a move,
    /// followed by everything below it, parents first. The kernel reports
    /// nothing for entries that arrive inside a moved directory.
    fn moved_in(&self, entry: EntryKind, path: &Path) -> Vec<ChangeReport> {
        let mut reports: Vec<ChangeReport> =
            self.report(ChangeKind::Create, entry, path).into_iter().collect();
        if entry != EntryKind::Directory || reports.is_empty() {
            return reports;
        }

        let mut pending = VecDeque::from([path.to_path_buf()]);
        while let Some(dir) = pending.pop_front() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
            entries.sort_by_key(|e| e.file_name());

            for child in entries {
                let Ok(file_type) = child.file_type() else {
                    continue;
                };
                if file_type.is_symlink() {
                    continue;
                }
                let child_path = child.path();
                let kind = if file_type.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                if let Some(report) = self.report(ChangeKind::Create, kind, &child_path) {
                    reports.push(report);
                    if kind == EntryKind::Directory {
                        pending.push_back(child_path);
                    }
                }
            }
        }
        reports
    }

    /// Classify one event. `is_dir` looks at the live filesystem and returns
    /// `None` when the path no longer exists.
    ///
    /// Renames become a delete of the old path and a create of the new one.
    /// Directory modifications carry no content and are dropped.
    pub fn classify<F>(&self, event: &Event, is_dir: F) -> Vec<ChangeReport>
    where
        F: Fn(&Path) -> Option<bool>,
    {
        let entry_of = |path: &Path| match is_dir(path) {
            Some(true) => EntryKind::Directory,
            _ => EntryKind::File,
        };

        let mut reports = Vec::new();
        match event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    let entry = match kind {
                        CreateKind::Folder => EntryKind::Directory,
                        CreateKind::File => EntryKind::File,
                        _ => entry_of(path),
                    };
                    reports.extend(self.report(ChangeKind::Create, entry, path));
                }
            }
            EventKind::Remove(kind) => {
                let entry = match kind {
                    RemoveKind::Folder => EntryKind::Directory,
                    _ => EntryKind::File,
                };
                for path in &event.paths {
                    reports.extend(self.report(ChangeKind::Delete, entry, path));
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
                (RenameMode::Both, [from, to]) => {
                    let entry = entry_of(to);
                    reports.extend(self.report(ChangeKind::Delete, entry, from));
                    reports.extend(self.moved_in(entry, to));
                }
                (RenameMode::From, paths) => {
                    for path in paths {
                        reports.extend(self.report(ChangeKind::Delete, EntryKind::File, path));
                    }
                }
                (RenameMode::To, paths) => {
                    for path in paths {
                        reports.extend(self.moved_in(entry_of(path), path));
                    }
                }
                (_, paths) => {
                    for path in paths {
                        let report = match is_dir(path) {
                            Some(dir) => {
                                let entry = if dir { EntryKind::Directory } else { EntryKind::File };
                                self.moved_in(entry, path)
                            }
                            None => self
                                .report(ChangeKind::Delete, EntryKind::File, path)
                                .into_iter()
                                .collect(),
                        };
                        reports.extend(report);
                    }
                }
            },
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                for path in &event.paths {
                    if is_dir(path) == Some(false) {
                        reports.extend(self.report(ChangeKind::Modify, EntryKind::File, path));
                    }
                }
            }
            _ => {}
        }
        reports
    }
}
