use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create table registry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_tables (
            table_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            table_name TEXT NOT NULL,
            public INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            UNIQUE(user_id, table_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_tables_user_id ON user_tables(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = db::connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='user_tables'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists);
    }
}
