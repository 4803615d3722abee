//! Project persistence
//!
//! The merge claim is a single conditional UPDATE on
//! `(generation, merged_generation)`, so it stays atomic across processes
//! sharing the database.

use folio_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::Project;
use crate::types::ProjectStore;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// SQLite-backed [`ProjectStore`]
#[derive(Clone)]
pub struct SqliteProjectStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let id: String = row.try_get("id")?;
    let generation: i64 = row.try_get("generation")?;
    let merged_generation: i64 = row.try_get("merged_generation")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Project {
        id: parse_uuid(&id)?,
        title: row.try_get("title")?,
        generation: generation as u32,
        merged_generation: merged_generation as u32,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn insert(&self, project: &Project) -> Result<()> {
        retry_on_lock("insert_project", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO projects (id, title, generation, merged_generation, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(project.id.to_string())
            .bind(&project.title)
            .bind(project.generation as i64)
            .bind(project.merged_generation as i64)
            .bind(project.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, project_id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, title, generation, merged_generation, created_at FROM projects WHERE id = ?",
        )
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(project_from_row).transpose()
    }

    async fn advance_cohort(&self, project_id: Uuid) -> Result<u32> {
        let generation: Option<i64> = retry_on_lock("advance_cohort", self.max_lock_wait_ms, || async {
            let generation = sqlx::query_scalar(
                "UPDATE projects SET generation = generation + 1 WHERE id = ? RETURNING generation",
            )
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
            Ok(generation)
        })
        .await?;

        generation
            .map(|g| g as u32)
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", project_id)))
    }

    async fn claim_merge(&self, project_id: Uuid, generation: u32) -> Result<bool> {
        let rows_affected = retry_on_lock("claim_merge", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE projects SET merged_generation = ?
                WHERE id = ? AND generation = ? AND merged_generation < ?
                "#,
            )
            .bind(generation as i64)
            .bind(project_id.to_string())
            .bind(generation as i64)
            .bind(generation as i64)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        Ok(rows_affected == 1)
    }

    async fn release_merge(&self, project_id: Uuid, generation: u32) -> Result<()> {
        retry_on_lock("release_merge", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                UPDATE projects SET merged_generation = ?
                WHERE id = ? AND merged_generation = ?
                "#,
            )
            .bind(generation.saturating_sub(1) as i64)
            .bind(project_id.to_string())
            .bind(generation as i64)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn list_awaiting_merge(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, generation, merged_generation, created_at FROM projects
            WHERE merged_generation < generation
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(project_from_row).collect()
    }

    async fn record_entities(&self, project_id: Uuid, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        retry_on_lock("record_entities", self.max_lock_wait_ms, || async {
            let mut tx = self.pool.begin().await?;
            for name in names.iter().filter(|n| !n.is_empty()) {
                sqlx::query("INSERT OR IGNORE INTO project_entities (project_id, name) VALUES (?, ?)")
                    .bind(project_id.to_string())
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn known_entities(&self, project_id: Uuid) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM project_entities WHERE project_id = ? ORDER BY name ASC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}
