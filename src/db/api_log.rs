use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct ApiLogStore {
    pool: SqlitePool,
}

/// A persisted log event.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[sqlx(rename = "log_level")]
    pub level: String,
    /// Event target (module path)
    pub category: String,
    pub message: Option<String>,
    pub exception: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<i64>,
}

impl ApiLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, entry: &LogEntry) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO api_logs
             (timestamp, log_level, category, message, exception, path, method, status_code)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.timestamp)
        .bind(&entry.level)
        .bind(&entry.category)
        .bind(&entry.message)
        .bind(&entry.exception)
        .bind(&entry.path)
        .bind(&entry.method)
        .bind(entry.status_code)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<LogEntry>, sqlx::Error> {
        sqlx::query_as(
            "SELECT timestamp, log_level, category, message, exception, path, method, status_code
             FROM api_logs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
