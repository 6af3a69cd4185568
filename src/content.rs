//! Storage for processed artifacts in the `content` table.
//!
//! Records are written once, when their job completes, and are only ever
//! removed by [`ContentStore::delete_by_ids`].

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{QueueError, QueueResult};
use crate::models::ContentRecord;

const CONTENT_COLUMNS: &str = "id, title, url, source, content_type, text_path, html_path, \
                               content, created_at, metadata_json";

/// Outcome of a delete-by-id pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    /// Distinct ids asked for.
    pub requested: usize,
    /// Rows actually removed.
    pub deleted: u64,
    /// Rows left in the table afterwards.
    pub remaining: i64,
}

#[derive(Clone)]
pub struct ContentStore {
    pool: SqlitePool,
}

impl ContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a record unless one with the same id already exists.
    ///
    /// Returns `true` when a row was written.
    pub async fn insert(&self, record: &ContentRecord) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO content
                (id, title, url, source, content_type, text_path, html_path, content, created_at, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.url)
        .bind(&record.source)
        .bind(&record.content_type)
        .bind(&record.text_path)
        .bind(&record.html_path)
        .bind(&record.content)
        .bind(record.created_at)
        .bind(serde_json::to_string(&record.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, id: &str) -> QueueResult<Option<ContentRecord>> {
        let sql = format!("SELECT {} FROM content WHERE id = ?", CONTENT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    pub async fn count(&self) -> QueueResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM content")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Record count per content type, largest first.
    pub async fn type_counts(&self) -> QueueResult<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT content_type, COUNT(*) AS n FROM content GROUP BY content_type ORDER BY n DESC, content_type ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("content_type"), row.get("n")))
            .collect())
    }

    /// Ids from `ids` that exist in the table.
    pub async fn existing_ids(&self, ids: &[String]) -> QueueResult<Vec<String>> {
        let mut found = Vec::new();
        for id in ids {
            let hit: Option<String> = sqlx::query_scalar("SELECT id FROM content WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(hit) = hit {
                found.push(hit);
            }
        }
        Ok(found)
    }

    /// Delete exactly the rows whose ids are given, in one transaction.
    pub async fn delete_by_ids(&self, ids: &[String]) -> QueueResult<DeleteReport> {
        let mut unique: Vec<&String> = ids.iter().collect();
        unique.sort();
        unique.dedup();

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for id in &unique {
            deleted += sqlx::query("DELETE FROM content WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(DeleteReport {
            requested: unique.len(),
            deleted,
            remaining: self.count().await?,
        })
    }
}

fn row_to_record(row: &SqliteRow) -> QueueResult<ContentRecord> {
    let id: String = row.get("id");
    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str(&metadata_json).map_err(|e| QueueError::CorruptRow {
        id: id.clone(),
        message: format!("metadata_json: {}", e),
    })?;

    Ok(ContentRecord {
        id,
        title: row.get("title"),
        url: row.get("url"),
        source: row.get("source"),
        content_type: row.get("content_type"),
        text_path: row.get("text_path"),
        html_path: row.get("html_path"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        metadata,
    })
}
