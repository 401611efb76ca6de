//! Postgres-backed repository implementations.

mod references;
mod temporal;
mod util;
mod watermarks;

use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    /// Live records plus the requested workspace; the requested language plus
    /// the default and "all languages" records.
    fn push_scope_conditions(
        qb: &mut QueryBuilder<'_, Postgres>,
        workspace_id: i32,
        language_id: i32,
    ) {
        qb.push(" AND workspace_id IN (0, ");
        qb.push_bind(workspace_id);
        qb.push(") AND language_id IN (0, -1, ");
        qb.push_bind(language_id);
        qb.push(")");
    }
}
