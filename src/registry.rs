//! Table registry accessor.
//!
//! A thin typed layer over the `user_tables` relation. Every row is keyed
//! by its owning identity; `(user_id, table_name)` is unique and
//! `table_id` is a UUID assigned once at creation.
//!
//! | Operation | Outcome |
//! |-----------|---------|
//! | [`create_table`](TableRegistry::create_table) | new id, or [`RegistryError::Conflict`] |
//! | [`list_tables`](TableRegistry::list_tables) | owner's rows, name ascending |
//! | [`table_exists`](TableRegistry::table_exists) | `bool` |
//! | [`get_table_by_id`](TableRegistry::get_table_by_id) | `Some(row)` or `None` |
//! | [`find_table_by_name`](TableRegistry::find_table_by_name) | exact-name lookup within an owner |
//! | [`set_visibility`](TableRegistry::set_visibility) | `()` or [`RegistryError::NotFound`] |

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use crate::models::TableRecord;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a table named '{0}' already exists")]
    Conflict(String),

    #[error("table not found: {0}")]
    NotFound(String),

    #[error("metadata store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Registry of document tables, backed by a pooled SQLite connection.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct TableRegistry {
    pool: SqlitePool,
}

impl TableRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a new table record and returns its freshly assigned id.
    pub async fn create_table(
        &self,
        owner: &str,
        name: &str,
        is_public: bool,
    ) -> Result<String, RegistryError> {
        let table_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO user_tables (table_id, user_id, table_name, public, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&table_id)
        .bind(owner)
        .bind(name)
        .bind(is_public)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(table_id = %table_id, table_name = name, "created table");
                Ok(table_id)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RegistryError::Conflict(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_tables(&self, owner: &str) -> Result<Vec<TableRecord>, RegistryError> {
        let rows = sqlx::query(
            r#"
            SELECT table_id, user_id, table_name, public
            FROM user_tables
            WHERE user_id = ?
            ORDER BY table_name ASC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    pub async fn table_exists(&self, owner: &str, name: &str) -> Result<bool, RegistryError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_tables WHERE user_id = ? AND table_name = ?)",
        )
        .bind(owner)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Looks a table up by id. An unknown id is `Ok(None)`, not an error.
    pub async fn get_table_by_id(
        &self,
        table_id: &str,
    ) -> Result<Option<TableRecord>, RegistryError> {
        let row = sqlx::query(
            "SELECT table_id, user_id, table_name, public FROM user_tables WHERE table_id = ?",
        )
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    pub async fn find_table_by_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<TableRecord>, RegistryError> {
        let row = sqlx::query(
            r#"
            SELECT table_id, user_id, table_name, public
            FROM user_tables
            WHERE user_id = ? AND table_name = ?
            "#,
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    /// Sets the visibility flag. Repeating the same update is a no-op that
    /// still succeeds; an unknown id fails with [`RegistryError::NotFound`].
    pub async fn set_visibility(&self, table_id: &str, is_public: bool) -> Result<(), RegistryError> {
        let result = sqlx::query("UPDATE user_tables SET public = ? WHERE table_id = ?")
            .bind(is_public)
            .bind(table_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(table_id.to_string()));
        }
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> TableRecord {
    TableRecord {
        table_id: row.get("table_id"),
        owner_id: row.get("user_id"),
        table_name: row.get("table_name"),
        is_public: row.get("public"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn registry() -> TableRegistry {
        let pool = db::connect_in_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        TableRegistry::new(pool)
    }

    #[tokio::test]
    async fn test_create_then_exists() {
        let reg = registry().await;
        let id = reg.create_table("u1", "Notes", false).await.unwrap();
        assert!(!id.is_empty());
        assert!(reg.table_exists("u1", "Notes").await.unwrap());
        assert!(!reg.table_exists("u2", "Notes").await.unwrap());
        assert!(!reg.table_exists("u1", "notes").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_name_per_owner_conflicts() {
        let reg = registry().await;
        reg.create_table("u1", "Notes", false).await.unwrap();
        let err = reg.create_table("u1", "Notes", true).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ref n) if n == "Notes"));

        // Same name under another owner is fine
        reg.create_table("u2", "Notes", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped_and_sorted() {
        let reg = registry().await;
        reg.create_table("u1", "zeta", false).await.unwrap();
        reg.create_table("u2", "alpha", true).await.unwrap();
        reg.create_table("u1", "beta", true).await.unwrap();
        reg.create_table("u1", "alpha", false).await.unwrap();

        let tables = reg.list_tables("u1").await.unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "zeta"]);
        assert!(tables.iter().all(|t| t.owner_id == "u1"));
    }

    #[tokio::test]
    async fn test_list_empty_is_not_an_error() {
        let reg = registry().await;
        assert!(reg.list_tables("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_id_unknown_is_none() {
        let reg = registry().await;
        assert_eq!(reg.get_table_by_id("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_by_name_is_exact_and_owner_scoped() {
        let reg = registry().await;
        let id = reg.create_table("u1", "Notes", false).await.unwrap();

        let found = reg.find_table_by_name("u1", "Notes").await.unwrap().unwrap();
        assert_eq!(found.table_id, id);
        assert!(reg.find_table_by_name("u1", "Note").await.unwrap().is_none());
        assert!(reg.find_table_by_name("u2", "Notes").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_visibility_unknown_is_not_found() {
        let reg = registry().await;
        let err = reg.set_visibility("missing", true).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_visibility_is_reflected_and_idempotent() {
        let reg = registry().await;
        let id = reg.create_table("u1", "Notes", false).await.unwrap();

        reg.set_visibility(&id, true).await.unwrap();
        let first = reg.get_table_by_id(&id).await.unwrap().unwrap();
        assert!(first.is_public);

        reg.set_visibility(&id, true).await.unwrap();
        let second = reg.get_table_by_id(&id).await.unwrap().unwrap();
        assert_eq!(first, second);
    }
}
