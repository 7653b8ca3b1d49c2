//! SQLite database layer

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::domain::container::{Container, ContainerStatus};
use crate::error::{Error, Result};

/// Initialize the database connection pool
pub async fn init(database_url: &str) -> anyhow::Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(path) = database_url.strip_prefix("sqlite:") {
        if let Some(path) = path.split('?').next() {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Enable WAL mode for better concurrent performance
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Parse an RFC 3339 column
pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))?
        .with_timezone(&Utc))
}

fn parse_optional_timestamp(value: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}

/// Database row for container
#[derive(Debug, FromRow)]
struct ContainerRow {
    id: String,
    project_id: String,
    template_id: String,
    status: String,
    host_port: Option<i64>,
    internal_port: i64,
    created_at: String,
    started_at: Option<String>,
    stopped_at: Option<String>,
    updated_at: String,
}

impl TryFrom<ContainerRow> for Container {
    type Error = Error;

    fn try_from(row: ContainerRow) -> Result<Self> {
        let status = ContainerStatus::from_str(&row.status)
            .ok_or_else(|| Error::Internal(format!("Invalid container status: {}", row.status)))?;

        Ok(Container {
            id: row.id,
            project_id: row.project_id,
            template_id: row.template_id,
            status,
            host_port: row.host_port.and_then(|p| u16::try_from(p).ok()),
            internal_port: u16::try_from(row.internal_port)
                .map_err(|_| Error::Internal(format!("Invalid internal port: {}", row.internal_port)))?,
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            started_at: parse_optional_timestamp(row.started_at, "started_at")?,
            stopped_at: parse_optional_timestamp(row.stopped_at, "stopped_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
        })
    }
}

const CONTAINER_COLUMNS: &str = "id, project_id, template_id, status, host_port, internal_port, created_at, started_at, stopped_at, updated_at";

/// Container repository for database operations
pub struct ContainerRepository {
    pool: SqlitePool,
}

impl ContainerRepository {
    /// Create a new repository with the given pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a container by ID
    pub async fn get(&self, id: &str) -> Result<Container> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
    }

    /// Find a container by exact ID
    pub async fn find(&self, id: &str) -> Result<Option<Container>> {
        let row: Option<ContainerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM containers WHERE id = ?",
            CONTAINER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Container::try_from).transpose()
    }

    /// Find a container by exact ID, or by a unique prefix of at least 12 characters
    pub async fn find_by_id_or_prefix(&self, id: &str) -> Result<Option<Container>> {
        if let Some(container) = self.find(id).await? {
            return Ok(Some(container));
        }
        if id.len() < 12 || id.contains(['%', '_']) {
            return Ok(None);
        }

        let rows: Vec<ContainerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM containers WHERE id LIKE ? || '%' LIMIT 2",
            CONTAINER_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        match rows.len() {
            1 => rows.into_iter().next().map(Container::try_from).transpose(),
            _ => Ok(None),
        }
    }

    /// Find the container row of a project
    pub async fn find_by_project(&self, project_id: &str) -> Result<Option<Container>> {
        let row: Option<ContainerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM containers WHERE project_id = ?",
            CONTAINER_COLUMNS
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Container::try_from).transpose()
    }

    /// Insert a container and link it to its project in one transaction
    pub async fn insert(&self, container: &Container) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO containers (id, project_id, template_id, status, host_port, internal_port, created_at, started_at, stopped_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&container.id)
        .bind(&container.project_id)
        .bind(&container.template_id)
        .bind(container.status.as_str())
        .bind(container.host_port.map(i64::from))
        .bind(i64::from(container.internal_port))
        .bind(container.created_at.to_rfc3339())
        .bind(container.started_at.map(|t| t.to_rfc3339()))
        .bind(container.stopped_at.map(|t| t.to_rfc3339()))
        .bind(container.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE projects SET container_id = ?, updated_at = ? WHERE id = ?")
            .bind(&container.id)
            .bind(Utc::now().to_rfc3339())
            .bind(&container.project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Persist status, port and timestamps of a container
    pub async fn update(&self, container: &Container) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE containers
            SET status = ?, host_port = ?, started_at = ?, stopped_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(container.status.as_str())
        .bind(container.host_port.map(i64::from))
        .bind(container.started_at.map(|t| t.to_rfc3339()))
        .bind(container.stopped_at.map(|t| t.to_rfc3339()))
        .bind(container.updated_at.to_rfc3339())
        .bind(&container.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ContainerNotFound(container.id.clone()));
        }

        Ok(())
    }

    /// Mark a container deleted, release its port and unlink its project
    pub async fn mark_deleted(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE containers
            SET status = ?, host_port = NULL, stopped_at = COALESCE(stopped_at, ?), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ContainerStatus::Deleted.as_str())
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ContainerNotFound(id.to_string()));
        }

        sqlx::query("UPDATE projects SET container_id = NULL, updated_at = ? WHERE container_id = ?")
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Remove a container row and unlink its project
    pub async fn delete_row(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM containers WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE projects SET container_id = NULL, updated_at = ? WHERE container_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Host ports held by containers that are not deleted
    pub async fn reserved_ports(&self) -> Result<Vec<u16>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT host_port FROM containers WHERE status != ? AND host_port IS NOT NULL",
        )
        .bind(ContainerStatus::Deleted.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(port,)| u16::try_from(port).ok())
            .collect())
    }
}

/// In-memory pool with migrations applied
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn insert_project(pool: &SqlitePool, id: &str) {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO projects (id, name, template_id, created_at, updated_at) VALUES (?, ?, 't1', ?, ?)",
        )
        .bind(id)
        .bind(id)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn project_container(pool: &SqlitePool, id: &str) -> Option<String> {
        let (container_id,): (Option<String>,) =
            sqlx::query_as("SELECT container_id FROM projects WHERE id = ?")
                .bind(id)
                .fetch_one(pool)
                .await
                .unwrap();
        container_id
    }

    #[tokio::test]
    async fn test_insert_links_project() {
        let pool = test_pool().await;
        insert_project(&pool, "p1").await;
        let repo = ContainerRepository::new(pool.clone());

        let mut container = Container::new("abc123".into(), "p1".into(), "t1".into(), 32001, 3000);
        container.mark_started();
        repo.insert(&container).await.unwrap();

        let fetched = repo.get("abc123").await.unwrap();
        assert_eq!(fetched.status, ContainerStatus::Running);
        assert_eq!(fetched.host_port, Some(32001));
        assert!(fetched.started_at.is_some());
        assert_eq!(project_container(&pool, "p1").await.as_deref(), Some("abc123"));

        let by_project = repo.find_by_project("p1").await.unwrap().unwrap();
        assert_eq!(by_project.id, "abc123");
    }

    #[tokio::test]
    async fn test_mark_deleted_releases_port() {
        let pool = test_pool().await;
        insert_project(&pool, "p1").await;
        let repo = ContainerRepository::new(pool.clone());

        let container = Container::new("abc123".into(), "p1".into(), "t1".into(), 32001, 3000);
        repo.insert(&container).await.unwrap();
        assert_eq!(repo.reserved_ports().await.unwrap(), vec![32001]);

        repo.mark_deleted("abc123").await.unwrap();

        let fetched = repo.get("abc123").await.unwrap();
        assert_eq!(fetched.status, ContainerStatus::Deleted);
        assert_eq!(fetched.host_port, None);
        assert!(repo.reserved_ports().await.unwrap().is_empty());
        assert_eq!(project_container(&pool, "p1").await, None);
    }

    #[tokio::test]
    async fn test_prefix_lookup() {
        let pool = test_pool().await;
        insert_project(&pool, "p1").await;
        insert_project(&pool, "p2").await;
        let repo = ContainerRepository::new(pool);

        repo.insert(&Container::new(
            "0123456789abcdef".into(),
            "p1".into(),
            "t1".into(),
            32001,
            3000,
        ))
        .await
        .unwrap();
        repo.insert(&Container::new(
            "0123456789abffff".into(),
            "p2".into(),
            "t1".into(),
            32002,
            3000,
        ))
        .await
        .unwrap();

        // too short
        assert!(repo.find_by_id_or_prefix("0123").await.unwrap().is_none());
        // ambiguous
        assert!(repo
            .find_by_id_or_prefix("0123456789ab")
            .await
            .unwrap()
            .is_none());
        let found = repo
            .find_by_id_or_prefix("0123456789abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "0123456789abcdef");
    }

    #[tokio::test]
    async fn test_delete_row() {
        let pool = test_pool().await;
        insert_project(&pool, "p1").await;
        let repo = ContainerRepository::new(pool.clone());

        repo.insert(&Container::new("c1".into(), "p1".into(), "t1".into(), 32001, 3000))
            .await
            .unwrap();
        repo.delete_row("c1").await.unwrap();

        assert!(matches!(
            repo.get("c1").await,
            Err(Error::ContainerNotFound(_))
        ));
        assert_eq!(project_container(&pool, "p1").await, None);
    }
}
