use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use super::{Clock, KvStore};
use crate::db::Database;
use crate::error::Result;

/// `kv_entries`-backed store sharing the application pool.
pub struct SqliteStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn expires_at(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| (self.clock.now() + ttl).timestamp_millis())
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = self.now_millis();
        sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(self.db.pool())
            .await?;

        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(self.expires_at(ttl))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = self.now_millis();
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(tx.as_mut())
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(self.expires_at(ttl))
        .execute(tx.as_mut())
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(inserted == 1)
    }

    async fn replace(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Option<String>> {
        let now = self.now_millis();
        let mut tx = self.db.pool().begin().await?;

        // Writing first takes the database write lock, so the read below cannot go stale.
        sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(tx.as_mut())
            .await?;

        let previous: Option<String> =
            sqlx::query_scalar("SELECT value FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(tx.as_mut())
                .await?;

        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(self.expires_at(ttl))
        .execute(tx.as_mut())
        .await?;

        tx.commit().await?;
        Ok(previous)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(self.now_millis())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(value)
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        // Single statement: SQLite serialises writers, so only one caller gets the row back.
        let value: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM kv_entries
            WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(self.now_millis())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
