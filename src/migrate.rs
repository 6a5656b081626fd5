//! Database schema migrations (idempotent).

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and all tables. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS warehouses (
            id TEXT PRIMARY KEY,
            address TEXT NOT NULL UNIQUE,
            organization_name TEXT NOT NULL,
            name TEXT NOT NULL,
            branch TEXT,
            type TEXT NOT NULL DEFAULT 'git',
            status TEXT NOT NULL DEFAULT 'Pending',
            progress INTEGER NOT NULL DEFAULT 0,
            error TEXT NOT NULL DEFAULT '',
            version TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_commit_records (
            warehouse_id TEXT PRIMARY KEY,
            commit_id TEXT NOT NULL,
            commit_message TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            processed_at INTEGER NOT NULL,
            changes_json TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (warehouse_id) REFERENCES warehouses(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generated_documents (
            warehouse_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            prompt TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            PRIMARY KEY (warehouse_id, ordinal),
            FOREIGN KEY (warehouse_id) REFERENCES warehouses(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_warehouses_owner_name ON warehouses(organization_name, name)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_warehouses_created_at ON warehouses(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
