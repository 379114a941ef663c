//! Durable cache rows and their database operations.

use sqlx::SqlitePool;

/// A cache entry as persisted in `cache_entries`.
///
/// All fields are owned types so rows can move into spawned tasks.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CacheRow {
    pub query_hash: String,
    pub response: String,
    pub provider: String,
    pub model_id: String,
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub created_at: String,
    pub hit_count: i64,
}

impl CacheRow {
    /// Insert or replace this row. Concurrent writers for one hash: last one wins.
    pub async fn upsert(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO cache_entries (
                query_hash, response, provider, model_id, created_at, hit_count
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(query_hash) DO UPDATE SET
                response = excluded.response,
                provider = excluded.provider,
                model_id = excluded.model_id,
                created_at = excluded.created_at,
                hit_count = excluded.hit_count",
        )
        .bind(&self.query_hash)
        .bind(&self.response)
        .bind(&self.provider)
        .bind(&self.model_id)
        .bind(&self.created_at)
        .bind(self.hit_count)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Fetch the row for a query hash, if any.
pub async fn fetch(pool: &SqlitePool, query_hash: &str) -> Result<Option<CacheRow>, sqlx::Error> {
    sqlx::query_as::<_, CacheRow>(
        "SELECT query_hash, response, provider, model_id, created_at, hit_count \
         FROM cache_entries WHERE query_hash = ?",
    )
    .bind(query_hash)
    .fetch_optional(pool)
    .await
}

/// Increment the persisted hit counter.
pub async fn increment_hit_count(pool: &SqlitePool, query_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE cache_entries SET hit_count = hit_count + 1 WHERE query_hash = ?")
        .bind(query_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete the row for a query hash.
pub async fn delete(pool: &SqlitePool, query_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM cache_entries WHERE query_hash = ?")
        .bind(query_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every row created before `cutoff` (RFC 3339, same format as `created_at`).
///
/// Returns the number of rows removed.
pub async fn delete_created_before(pool: &SqlitePool, cutoff: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Number of persisted rows.
pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache_entries")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Spawn a fire-and-forget hit counter update.
///
/// If the write fails, a warning is logged but the error is not propagated.
pub fn spawn_hit_count_update(pool: &SqlitePool, query_hash: String) {
    let pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = increment_hit_count(&pool, &query_hash).await {
            tracing::warn!(
                query_hash = %query_hash,
                error = %e,
                "Failed to update cache hit count"
            );
        }
    });
}
