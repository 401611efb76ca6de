use async_trait::async_trait;

use crate::application::repos::{RepoError, WatermarkStore};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl WatermarkStore for PostgresRepositories {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<i64>, RepoError> {
        sqlx::query_scalar(
            r#"
            SELECT value
            FROM tidemark_registry
            WHERE namespace = $1 AND key = $2
            "#,
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn set(&self, namespace: &str, key: &str, value: i64) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO tidemark_registry (namespace, key, value, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (namespace, key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
