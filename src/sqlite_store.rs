//! SQLite-backed [`WarehouseStore`] implementation.
//!
//! Every write is a single short statement (or one short transaction), so
//! no connection is held across a pipeline step and status reads are never
//! blocked for longer than one statement.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use repo_warehouse_core::lifecycle::StatusChange;
use repo_warehouse_core::models::{
    CommitSummary, DocumentCommitRecord, GeneratedDocument, Warehouse, WarehouseStatus,
};
use repo_warehouse_core::store::WarehouseStore;

const WAREHOUSE_COLUMNS: &str = "id, address, organization_name, name, branch, type, status, \
     progress, error, version, description, model, created_at";

/// SQLite implementation of the [`WarehouseStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_warehouse(row: &SqliteRow) -> Result<Warehouse> {
    let status: String = row.try_get("status")?;
    let kind: String = row.try_get("type")?;
    let progress: i64 = row.try_get("progress")?;

    Ok(Warehouse {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        organization_name: row.try_get("organization_name")?,
        name: row.try_get("name")?,
        branch: row.try_get("branch")?,
        kind: kind.parse().map_err(|e: String| anyhow!(e))?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        progress: progress.clamp(0, 100) as u8,
        error: row.try_get("error")?,
        version: row.try_get("version")?,
        description: row.try_get("description")?,
        model: row.try_get("model")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

#[async_trait]
impl WarehouseStore for SqliteStore {
    async fn insert_warehouse(&self, warehouse: &Warehouse) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO warehouses (id, address, organization_name, name, branch, type, status,
                                    progress, error, version, description, model, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&warehouse.id)
        .bind(&warehouse.address)
        .bind(&warehouse.organization_name)
        .bind(&warehouse.name)
        .bind(&warehouse.branch)
        .bind(warehouse.kind.as_str())
        .bind(warehouse.status.as_str())
        .bind(warehouse.progress as i64)
        .bind(&warehouse.error)
        .bind(&warehouse.version)
        .bind(&warehouse.description)
        .bind(&warehouse.model)
        .bind(warehouse.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_submission(&self, warehouse: &Warehouse) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE warehouses
            SET address = ?, branch = ?, model = ?, description = ?,
                status = ?, progress = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(&warehouse.address)
        .bind(&warehouse.branch)
        .bind(&warehouse.model)
        .bind(&warehouse.description)
        .bind(warehouse.status.as_str())
        .bind(warehouse.progress as i64)
        .bind(&warehouse.error)
        .bind(&warehouse.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_warehouse(&self, id: &str) -> Result<Option<Warehouse>> {
        let row = sqlx::query(&format!("SELECT {} FROM warehouses WHERE id = ?", WAREHOUSE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_warehouse).transpose()
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<Warehouse>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM warehouses WHERE address = ?",
            WAREHOUSE_COLUMNS
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_warehouse).transpose()
    }

    async fn find_by_name(&self, organization: &str, name: &str) -> Result<Option<Warehouse>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM warehouses WHERE organization_name = ? AND name = ? \
             ORDER BY created_at ASC LIMIT 1",
            WAREHOUSE_COLUMNS
        ))
        .bind(organization)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_warehouse).transpose()
    }

    async fn list_warehouses(&self, offset: i64, limit: i64) -> Result<(i64, Vec<Warehouse>)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM warehouses")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM warehouses ORDER BY created_at DESC LIMIT ? OFFSET ?",
            WAREHOUSE_COLUMNS
        ))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(row_to_warehouse).collect::<Result<Vec<_>>>()?;
        Ok((total, items))
    }

    async fn apply_status(
        &self,
        id: &str,
        expected: WarehouseStatus,
        change: &StatusChange,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE warehouses
            SET status = ?, progress = ?, error = ?, version = COALESCE(?, version)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(change.status.as_str())
        .bind(change.progress as i64)
        .bind(&change.error)
        .bind(&change.version)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE warehouses SET progress = ? WHERE id = ? AND status = 'Processing' AND progress <= ?",
        )
        .bind(progress as i64)
        .bind(id)
        .bind(progress as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_commit_record(&self, warehouse_id: &str) -> Result<Option<DocumentCommitRecord>> {
        let row = sqlx::query(
            r#"
            SELECT warehouse_id, commit_id, commit_message, author, processed_at, changes_json
            FROM document_commit_records WHERE warehouse_id = ?
            "#,
        )
        .bind(warehouse_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let changes_json: String = row.try_get("changes_json")?;
        let changes: Vec<CommitSummary> = serde_json::from_str(&changes_json).unwrap_or_default();

        Ok(Some(DocumentCommitRecord {
            warehouse_id: row.try_get("warehouse_id")?,
            commit_id: row.try_get("commit_id")?,
            commit_message: row.try_get("commit_message")?,
            author: row.try_get("author")?,
            processed_at: from_millis(row.try_get("processed_at")?),
            changes,
        }))
    }

    async fn put_commit_record(&self, record: &DocumentCommitRecord) -> Result<()> {
        let changes_json = serde_json::to_string(&record.changes)?;
        sqlx::query(
            r#"
            INSERT INTO document_commit_records
                (warehouse_id, commit_id, commit_message, author, processed_at, changes_json)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(warehouse_id) DO UPDATE SET
                commit_id = excluded.commit_id,
                commit_message = excluded.commit_message,
                author = excluded.author,
                processed_at = excluded.processed_at,
                changes_json = excluded.changes_json
            "#,
        )
        .bind(&record.warehouse_id)
        .bind(&record.commit_id)
        .bind(&record.commit_message)
        .bind(&record.author)
        .bind(record.processed_at.timestamp_millis())
        .bind(changes_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_documents(
        &self,
        warehouse_id: &str,
        documents: &[GeneratedDocument],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM generated_documents WHERE warehouse_id = ?")
            .bind(warehouse_id)
            .execute(&mut *tx)
            .await?;

        for (ordinal, doc) in documents.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO generated_documents
                    (warehouse_id, ordinal, path, name, prompt, content, generated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(warehouse_id)
            .bind(ordinal as i64)
            .bind(&doc.path)
            .bind(&doc.name)
            .bind(&doc.prompt)
            .bind(&doc.content)
            .bind(doc.generated_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_documents(&self, warehouse_id: &str) -> Result<Vec<GeneratedDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT warehouse_id, path, name, prompt, content, generated_at
            FROM generated_documents WHERE warehouse_id = ? ORDER BY ordinal
            "#,
        )
        .bind(warehouse_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(GeneratedDocument {
                    warehouse_id: row.try_get("warehouse_id")?,
                    path: row.try_get("path")?,
                    name: row.try_get("name")?,
                    prompt: row.try_get("prompt")?,
                    content: row.try_get("content")?,
                    generated_at: from_millis(row.try_get("generated_at")?),
                })
            })
            .collect()
    }
}
