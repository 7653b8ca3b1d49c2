//! File tree repository for database operations
//!
//! Multi-row mutations (recursive delete, recursive rename, scan insertion)
//! each run inside a single transaction.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::file_node::{FileNode, NewFileNode, ScannedEntry};
use crate::domain::path::{self, ROOT_PATH};
use crate::error::{Error, Result};
use crate::infra::sqlite::parse_timestamp;

/// SQLite caps bound parameters per statement
const DELETE_BATCH: usize = 500;

/// Database row for file node
#[derive(Debug, FromRow)]
struct FileNodeRow {
    id: String,
    project_id: String,
    parent_id: Option<String>,
    name: String,
    path: String,
    is_directory: bool,
    content: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<FileNodeRow> for FileNode {
    type Error = Error;

    fn try_from(row: FileNodeRow) -> Result<Self> {
        Ok(FileNode {
            id: row.id,
            project_id: row.project_id,
            parent_id: row.parent_id,
            name: row.name,
            path: row.path,
            is_directory: row.is_directory,
            content: if row.is_directory { None } else { row.content },
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
        })
    }
}

const NODE_COLUMNS: &str =
    "id, project_id, parent_id, name, path, is_directory, content, created_at, updated_at";

fn map_unique(err: sqlx::Error, path: &str) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::FileAlreadyExists(path.to_string())
        }
        _ => err.into(),
    }
}

async fn fetch_node(conn: &mut SqliteConnection, id: &str) -> Result<Option<FileNode>> {
    let row: Option<FileNodeRow> = sqlx::query_as(&format!(
        "SELECT {} FROM file_nodes WHERE id = ?",
        NODE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(FileNode::try_from).transpose()
}

async fn fetch_by_path(
    conn: &mut SqliteConnection,
    project_id: &str,
    path: &str,
) -> Result<Option<FileNode>> {
    let row: Option<FileNodeRow> = sqlx::query_as(&format!(
        "SELECT {} FROM file_nodes WHERE project_id = ? AND path = ?",
        NODE_COLUMNS
    ))
    .bind(project_id)
    .bind(path)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(FileNode::try_from).transpose()
}

/// Collect every descendant of `node`, breadth first.
///
/// Follows parent links, then adds any row stored under the node's path
/// prefix that a parent link missed (nodes linked under the root fallback).
async fn descendants(conn: &mut SqliteConnection, node: &FileNode) -> Result<Vec<FileNode>> {
    let mut seen: HashSet<String> = HashSet::from([node.id.clone()]);
    let mut found = Vec::new();
    let mut queue = VecDeque::from([node.id.clone()]);

    while let Some(parent_id) = queue.pop_front() {
        let rows: Vec<FileNodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM file_nodes WHERE parent_id = ?",
            NODE_COLUMNS
        ))
        .bind(&parent_id)
        .fetch_all(&mut *conn)
        .await?;

        for row in rows {
            if seen.insert(row.id.clone()) {
                queue.push_back(row.id.clone());
                found.push(FileNode::try_from(row)?);
            }
        }
    }

    if node.path != ROOT_PATH {
        let prefix = format!("{}/", node.path);
        let rows: Vec<FileNodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM file_nodes WHERE project_id = ? AND substr(path, 1, length(?)) = ?",
            NODE_COLUMNS
        ))
        .bind(&node.project_id)
        .bind(&prefix)
        .bind(&prefix)
        .fetch_all(&mut *conn)
        .await?;

        for row in rows {
            if seen.insert(row.id.clone()) {
                found.push(FileNode::try_from(row)?);
            }
        }
    }

    Ok(found)
}

/// File tree repository for database operations
pub struct FileRepository {
    pool: SqlitePool,
}

impl FileRepository {
    /// Create a new repository with the given pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a node by ID
    pub async fn get(&self, id: &str) -> Result<FileNode> {
        let mut conn = self.pool.acquire().await?;
        fetch_node(&mut conn, id)
            .await?
            .ok_or_else(|| Error::FileNotFound(id.to_string()))
    }

    /// Find a node by its normalized path
    pub async fn find_by_path(&self, project_id: &str, path: &str) -> Result<Option<FileNode>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_path(&mut conn, project_id, path).await
    }

    /// All nodes of a project
    pub async fn list_by_project(&self, project_id: &str) -> Result<Vec<FileNode>> {
        let rows: Vec<FileNodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM file_nodes WHERE project_id = ? ORDER BY path ASC",
            NODE_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Insert a node. A duplicate path is a conflict.
    pub async fn insert(&self, node: NewFileNode) -> Result<FileNode> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let content = if node.is_directory { None } else { node.content };

        sqlx::query(
            r#"
            INSERT INTO file_nodes (id, project_id, parent_id, name, path, is_directory, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&node.project_id)
        .bind(&node.parent_id)
        .bind(&node.name)
        .bind(&node.path)
        .bind(node.is_directory)
        .bind(&content)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, &node.path))?;

        self.get(&id).await
    }

    /// Bump a node's timestamp, optionally marking its content stale.
    ///
    /// `is_directory` realigns the kind when a create event disagrees with
    /// the stored row.
    pub async fn touch(
        &self,
        id: &str,
        is_directory: Option<bool>,
        clear_content: bool,
    ) -> Result<FileNode> {
        let result = sqlx::query(
            r#"
            UPDATE file_nodes
            SET is_directory = COALESCE(?, is_directory),
                content = CASE WHEN ? OR COALESCE(?, is_directory) THEN NULL ELSE content END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(is_directory)
        .bind(clear_content)
        .bind(is_directory)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::FileNotFound(id.to_string()));
        }

        self.get(id).await
    }

    /// Store new content for a file
    pub async fn update_content(&self, id: &str, content: &str) -> Result<FileNode> {
        let result = sqlx::query(
            r#"
            UPDATE file_nodes
            SET content = ?, updated_at = ?
            WHERE id = ? AND is_directory = 0
            "#,
        )
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let node = self.get(id).await?;
            return Err(Error::InvalidPath(format!("{} is a directory", node.path)));
        }

        self.get(id).await
    }

    /// Delete a node and all of its descendants, returning the number of rows removed
    pub async fn delete_tree(&self, id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let node = fetch_node(&mut tx, id)
            .await?
            .ok_or_else(|| Error::FileNotFound(id.to_string()))?;

        let mut ids = vec![node.id.clone()];
        ids.extend(descendants(&mut tx, &node).await?.into_iter().map(|n| n.id));

        let mut removed = 0;
        for chunk in ids.chunks(DELETE_BATCH) {
            let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM file_nodes WHERE id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
            removed += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Rename a node, rewriting the path of every descendant.
    ///
    /// Returns the renamed node and its previous path.
    pub async fn rename_tree(&self, id: &str, new_name: &str) -> Result<(FileNode, String)> {
        let mut tx = self.pool.begin().await?;

        let node = fetch_node(&mut tx, id)
            .await?
            .ok_or_else(|| Error::FileNotFound(id.to_string()))?;

        if node.path == ROOT_PATH {
            return Err(Error::InvalidPath("the workspace root cannot be renamed".to_string()));
        }
        if node.name == new_name {
            return Err(Error::InvalidParameter(format!(
                "{} already has name {}",
                node.path, new_name
            )));
        }

        let old_path = node.path.clone();
        let new_path = path::join(&path::parent(&old_path), new_name);

        if fetch_by_path(&mut tx, &node.project_id, &new_path)
            .await?
            .is_some()
        {
            return Err(Error::FileAlreadyExists(new_path));
        }

        let now = Utc::now().to_rfc3339();

        if node.is_directory {
            for child in descendants(&mut tx, &node).await? {
                let Some(rewritten) = path::rewrite_prefix(&child.path, &old_path, &new_path)
                else {
                    continue;
                };
                sqlx::query("UPDATE file_nodes SET path = ?, updated_at = ? WHERE id = ?")
                    .bind(&rewritten)
                    .bind(&now)
                    .bind(&child.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_unique(e, &rewritten))?;
            }
        }

        sqlx::query("UPDATE file_nodes SET name = ?, path = ?, updated_at = ? WHERE id = ?")
            .bind(new_name)
            .bind(&new_path)
            .bind(&now)
            .bind(&node.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_unique(e, &new_path))?;

        let renamed = fetch_node(&mut tx, id)
            .await?
            .ok_or_else(|| Error::FileNotFound(id.to_string()))?;

        tx.commit().await?;
        Ok((renamed, old_path))
    }

    /// Record a workspace scan.
    ///
    /// Ensures the root node exists, then inserts entries shallowest first so
    /// every parent row exists before its children. Paths already stored are
    /// skipped. Returns the number of inserted rows.
    pub async fn insert_scanned(
        &self,
        project_id: &str,
        root_name: &str,
        mut entries: Vec<ScannedEntry>,
    ) -> Result<usize> {
        entries.sort_by(|a, b| {
            path::depth(&a.path)
                .cmp(&path::depth(&b.path))
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut tx = self.pool.begin().await?;

        let existing: Vec<(String, String, bool)> =
            sqlx::query_as("SELECT path, id, is_directory FROM file_nodes WHERE project_id = ?")
                .bind(project_id)
                .fetch_all(&mut *tx)
                .await?;
        let mut directories: HashMap<String, String> = existing
            .iter()
            .filter(|(_, _, is_dir)| *is_dir)
            .map(|(path, id, _)| (path.clone(), id.clone()))
            .collect();
        let mut known: HashSet<String> = existing.into_iter().map(|(path, _, _)| path).collect();

        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;

        if !known.contains(ROOT_PATH) {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO file_nodes (id, project_id, parent_id, name, path, is_directory, content, created_at, updated_at)
                VALUES (?, ?, NULL, ?, ?, 1, NULL, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(project_id)
            .bind(root_name)
            .bind(ROOT_PATH)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            known.insert(ROOT_PATH.to_string());
            directories.insert(ROOT_PATH.to_string(), id);
            inserted += 1;
        }
        let root_id = directories.get(ROOT_PATH).cloned();

        for entry in entries {
            if entry.path == ROOT_PATH || !known.insert(entry.path.clone()) {
                continue;
            }

            let id = Uuid::new_v4().to_string();
            let parent_id = directories
                .get(&path::parent(&entry.path))
                .cloned()
                .or_else(|| root_id.clone());
            let content = if entry.is_directory { None } else { entry.content };

            sqlx::query(
                r#"
                INSERT INTO file_nodes (id, project_id, parent_id, name, path, is_directory, content, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(project_id)
            .bind(&parent_id)
            .bind(path::file_name(&entry.path))
            .bind(&entry.path)
            .bind(entry.is_directory)
            .bind(&content)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            if entry.is_directory {
                directories.insert(entry.path, id);
            }
            inserted += 1;
        }

        tx.commit().await?;
        Ok(inserted)
    }
}
