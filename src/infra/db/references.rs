use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::application::repos::{ReferenceIndex, RepoError};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl ReferenceIndex for PostgresRepositories {
    async fn find_pages_embedding(
        &self,
        content_uid: i64,
        language_id: i32,
    ) -> Result<BTreeSet<i64>, RepoError> {
        let pages: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT page_id
            FROM content_references
            WHERE content_uid = $1
              AND language_id IN ($2, -1)
            "#,
        )
        .bind(content_uid)
        .bind(language_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(pages.into_iter().collect())
    }
}
