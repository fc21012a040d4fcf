use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Append-only AI result cache, keyed by query fingerprint
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ai_cache (
            fingerprint TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ai_cache_created_at ON ai_cache(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
