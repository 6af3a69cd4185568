use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Work items. `rowid` keeps insertion order for jobs created in the same second.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_jobs (
            id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            source TEXT NOT NULL,
            payload_json TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            priority TEXT NOT NULL DEFAULT 'normal',
            dedup_key TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(dedup_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Processed artifacts. Linked to queue_jobs by id only, no foreign key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content (
            id TEXT PRIMARY KEY,
            title TEXT,
            url TEXT,
            source TEXT NOT NULL,
            content_type TEXT NOT NULL,
            text_path TEXT,
            html_path TEXT,
            content TEXT,
            created_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_jobs_status ON queue_jobs(status, priority, created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_jobs_updated_at ON queue_jobs(status, updated_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_source ON content(source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_url ON content(url)")
        .execute(pool)
        .await?;

    Ok(())
}
