//! Project and template repository for database operations

use chrono::Utc;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::domain::project::{CreateProjectParams, CreateTemplateParams, Project, Template};
use crate::error::{Error, Result};
use crate::infra::sqlite::parse_timestamp;

/// Database row for project
#[derive(Debug, FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    description: Option<String>,
    template_id: String,
    container_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = Error;

    fn try_from(row: ProjectRow) -> Result<Self> {
        Ok(Project {
            id: row.id,
            name: row.name,
            description: row.description,
            template_id: row.template_id,
            container_id: row.container_id,
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
        })
    }
}

/// Database row for template
#[derive(Debug, FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    image: Option<String>,
    internal_port: Option<i64>,
    start_command: Option<String>,
    source_dir: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TemplateRow> for Template {
    type Error = Error;

    fn try_from(row: TemplateRow) -> Result<Self> {
        Ok(Template {
            id: row.id,
            name: row.name,
            image: row.image,
            internal_port: row.internal_port.and_then(|p| u16::try_from(p).ok()),
            start_command: row.start_command,
            source_dir: row.source_dir,
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
        })
    }
}

/// Project repository for database operations
pub struct ProjectRepository {
    pool: SqlitePool,
}

impl ProjectRepository {
    /// Create a new repository with the given pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new project
    pub async fn create(&self, params: CreateProjectParams) -> Result<Project> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, template_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&params.name)
        .bind(&params.description)
        .bind(&params.template_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get(&id).await
    }

    /// Get a project by ID
    pub async fn get(&self, id: &str) -> Result<Project> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::ProjectNotFound(id.to_string()))
    }

    /// Find a project by ID
    pub async fn find(&self, id: &str) -> Result<Option<Project>> {
        let row: Option<ProjectRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, template_id, container_id, created_at, updated_at
            FROM projects
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Project::try_from).transpose()
    }

    /// List all projects
    pub async fn list(&self) -> Result<Vec<Project>> {
        let rows: Vec<ProjectRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, template_id, container_id, created_at, updated_at
            FROM projects
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Switch the template a project provisions from
    pub async fn update_template(&self, id: &str, template_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET template_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(template_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ProjectNotFound(id.to_string()));
        }

        Ok(())
    }

    /// Point a project at its current container
    pub async fn set_container(&self, id: &str, container_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET container_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(container_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ProjectNotFound(id.to_string()));
        }

        Ok(())
    }

    /// Delete a project together with its container row and file tree
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM file_nodes WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM containers WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ProjectNotFound(id.to_string()));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Create a new template
    pub async fn create_template(&self, params: CreateTemplateParams) -> Result<Template> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO templates (id, name, image, internal_port, start_command, source_dir, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&params.name)
        .bind(&params.image)
        .bind(params.internal_port.map(i64::from))
        .bind(&params.start_command)
        .bind(&params.source_dir)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_template(&id).await
    }

    /// Get a template by ID
    pub async fn get_template(&self, id: &str) -> Result<Template> {
        let row: TemplateRow = sqlx::query_as(
            r#"
            SELECT id, name, image, internal_port, start_command, source_dir, created_at, updated_at
            FROM templates
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::TemplateNotFound(id.to_string()))?;

        row.try_into()
    }

    /// List all templates
    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(
            r#"
            SELECT id, name, image, internal_port, start_command, source_dir, created_at, updated_at
            FROM templates
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}
