//! Narrative unit persistence
//!
//! Lifecycle writes are conditional on the stored `(status, retry_count)` so
//! two concurrent mutations of the same unit serialize: the loser sees zero
//! affected rows and has to reload.

use folio_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid};
use crate::models::{
    AnalysisResult, LifecycleState, NarrativeUnit, StatusCounts, UnitKind, UnitStatus,
    UnitVersion,
};
use crate::types::UnitStore;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const UNIT_COLUMNS: &str = r#"
    id, project_id, parent_id, kind, ordinal, title, content, trace_id,
    status, retry_count, failure_reason, started_at, completed_at,
    processing_time_ms, created_at, updated_at
"#;

/// SQLite-backed [`UnitStore`]
#[derive(Clone)]
pub struct SqliteUnitStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteUnitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }
}

fn unit_from_row(row: &SqliteRow) -> Result<NarrativeUnit> {
    let id: String = row.try_get("id")?;
    let project_id: String = row.try_get("project_id")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let kind: String = row.try_get("kind")?;
    let ordinal: i64 = row.try_get("ordinal")?;
    let status: String = row.try_get("status")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let processing_time_ms: Option<i64> = row.try_get("processing_time_ms")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let lifecycle = LifecycleState {
        status: status.parse()?,
        retry_count: retry_count as u32,
        failure_reason: row.try_get("failure_reason")?,
        started_at: parse_optional_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
        processing_time_ms: processing_time_ms.map(|ms| ms as u64),
    };

    let mut unit = NarrativeUnit::new_narrative(
        parse_uuid(&project_id)?,
        parent_id.as_deref().map(parse_uuid).transpose()?,
        ordinal as u32,
        row.try_get::<String, _>("title")?,
        row.try_get::<String, _>("content")?,
    )
    .with_lifecycle(lifecycle);

    unit.id = parse_uuid(&id)?;
    unit.kind = kind.parse::<UnitKind>()?;
    unit.trace_id = row.try_get("trace_id")?;
    unit.created_at = parse_timestamp(&created_at)?;
    unit.updated_at = parse_timestamp(&updated_at)?;

    Ok(unit)
}

#[async_trait::async_trait]
impl UnitStore for SqliteUnitStore {
    async fn insert(&self, unit: &NarrativeUnit) -> Result<()> {
        let lifecycle = unit.lifecycle();

        retry_on_lock("insert_unit", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO units (
                    id, project_id, parent_id, kind, ordinal, title, content, trace_id,
                    status, retry_count, failure_reason, started_at, completed_at,
                    processing_time_ms, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(unit.id.to_string())
            .bind(unit.project_id.to_string())
            .bind(unit.parent_id.map(|id| id.to_string()))
            .bind(unit.kind.as_str())
            .bind(unit.ordinal as i64)
            .bind(&unit.title)
            .bind(&unit.content)
            .bind(&unit.trace_id)
            .bind(lifecycle.status.as_str())
            .bind(lifecycle.retry_count as i64)
            .bind(&lifecycle.failure_reason)
            .bind(lifecycle.started_at.map(|dt| dt.to_rfc3339()))
            .bind(lifecycle.completed_at.map(|dt| dt.to_rfc3339()))
            .bind(lifecycle.processing_time_ms.map(|ms| ms as i64))
            .bind(unit.created_at.to_rfc3339())
            .bind(unit.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, unit_id: Uuid) -> Result<Option<NarrativeUnit>> {
        let query = format!("SELECT {} FROM units WHERE id = ?", UNIT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(unit_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(unit_from_row).transpose()
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<NarrativeUnit>> {
        let query = format!(
            "SELECT {} FROM units WHERE project_id = ? ORDER BY ordinal ASC",
            UNIT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(unit_from_row).collect()
    }

    async fn compare_and_swap(&self, unit: &NarrativeUnit, expected: UnitVersion) -> Result<bool> {
        let lifecycle = unit.lifecycle();

        let rows_affected = retry_on_lock("update_unit_lifecycle", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE units SET
                    status = ?,
                    retry_count = ?,
                    failure_reason = ?,
                    started_at = ?,
                    completed_at = ?,
                    processing_time_ms = ?,
                    updated_at = ?
                WHERE id = ? AND status = ? AND retry_count = ?
                "#,
            )
            .bind(lifecycle.status.as_str())
            .bind(lifecycle.retry_count as i64)
            .bind(&lifecycle.failure_reason)
            .bind(lifecycle.started_at.map(|dt| dt.to_rfc3339()))
            .bind(lifecycle.completed_at.map(|dt| dt.to_rfc3339()))
            .bind(lifecycle.processing_time_ms.map(|ms| ms as i64))
            .bind(unit.updated_at.to_rfc3339())
            .bind(unit.id.to_string())
            .bind(expected.status.as_str())
            .bind(expected.retry_count as i64)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        Ok(rows_affected == 1)
    }

    async fn list_retry_candidates(&self, max_retry_count: u32) -> Result<Vec<NarrativeUnit>> {
        let query = format!(
            r#"
            SELECT {} FROM units
            WHERE kind = 'NARRATIVE'
              AND status IN ('PENDING', 'FAILED')
              AND retry_count < ?
            ORDER BY project_id, ordinal ASC
            "#,
            UNIT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(max_retry_count as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(unit_from_row).collect()
    }

    async fn list_exhausted(
        &self,
        project_id: Uuid,
        max_retry_count: u32,
    ) -> Result<Vec<NarrativeUnit>> {
        let query = format!(
            r#"
            SELECT {} FROM units
            WHERE project_id = ?
              AND kind = 'NARRATIVE'
              AND status = 'FAILED'
              AND retry_count >= ?
            ORDER BY ordinal ASC
            "#,
            UNIT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(project_id.to_string())
            .bind(max_retry_count as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(unit_from_row).collect()
    }

    async fn status_counts(&self, project_id: Uuid) -> Result<StatusCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count FROM units
            WHERE project_id = ? AND kind = 'NARRATIVE'
            GROUP BY status
            "#,
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.add(status.parse::<UnitStatus>()?, count as u32);
        }
        Ok(counts)
    }

    async fn count_in_group(&self, parent_id: Uuid) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM units WHERE parent_id = ? AND kind = 'NARRATIVE'",
        )
        .bind(parent_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    async fn max_ordinal(&self, project_id: Uuid) -> Result<u32> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(ordinal) FROM units WHERE project_id = ?")
                .bind(project_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(max.unwrap_or(0) as u32)
    }

    async fn save_result(&self, unit_id: Uuid, result: &AnalysisResult) -> Result<()> {
        let json = serde_json::to_string(result)
            .map_err(|e| Error::Internal(format!("Failed to serialize result: {}", e)))?;

        retry_on_lock("save_unit_result", self.max_lock_wait_ms, || async {
            sqlx::query("UPDATE units SET result_json = ? WHERE id = ?")
                .bind(&json)
                .bind(unit_id.to_string())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn load_result(&self, unit_id: Uuid) -> Result<Option<AnalysisResult>> {
        let json: Option<Option<String>> =
            sqlx::query_scalar("SELECT result_json FROM units WHERE id = ?")
                .bind(unit_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match json.flatten() {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| Error::Internal(format!("Failed to deserialize result: {}", e))),
            None => Ok(None),
        }
    }
}
