use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    application::repos::{RepoError, TemporalContentStore, UpcomingQuery},
    domain::{ContentTable, TemporalContent, TemporalContentParams, UnixTimestamp},
};

use super::{PostgresRepositories, map_sqlx_error};

const CONTENT_COLUMNS: &str =
    "uid, pid, title, starttime, endtime, language_id, workspace_id, hidden, deleted";

#[derive(sqlx::FromRow)]
struct TemporalContentRow {
    uid: i64,
    pid: i64,
    title: String,
    starttime: i64,
    endtime: i64,
    language_id: i32,
    workspace_id: i32,
    hidden: bool,
    deleted: bool,
}

impl TemporalContentRow {
    fn into_content(self, table: &ContentTable) -> TemporalContent {
        TemporalContent::new(TemporalContentParams {
            uid: self.uid,
            table: table.clone(),
            title: self.title,
            pid: self.pid,
            starttime: Some(self.starttime),
            endtime: Some(self.endtime),
            language_id: self.language_id,
            workspace_id: self.workspace_id,
            hidden: self.hidden,
            deleted: self.deleted,
        })
    }
}

fn select_from(table: &ContentTable) -> QueryBuilder<'static, Postgres> {
    QueryBuilder::new(format!(
        "SELECT {CONTENT_COLUMNS} FROM {table} WHERE deleted = FALSE"
    ))
}

#[async_trait]
impl TemporalContentStore for PostgresRepositories {
    async fn min_upcoming(
        &self,
        query: &UpcomingQuery<'_>,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        let column = query.field.column();
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT MIN({column}) FROM {table} WHERE deleted = FALSE AND {column} > 0 AND {column} > ",
            table = query.table,
        ));
        qb.push_bind(query.now);
        if !query.include_hidden {
            qb.push(" AND hidden = FALSE");
        }
        Self::push_scope_conditions(&mut qb, query.workspace_id, query.language_id);

        qb.build_query_scalar::<Option<i64>>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn rows_transitioning_between(
        &self,
        table: &ContentTable,
        from: UnixTimestamp,
        to: UnixTimestamp,
        include_hidden: bool,
    ) -> Result<Vec<TemporalContent>, RepoError> {
        let mut qb = select_from(table);
        if !include_hidden {
            qb.push(" AND hidden = FALSE");
        }
        qb.push(" AND ((starttime > ");
        qb.push_bind(from);
        qb.push(" AND starttime <= ");
        qb.push_bind(to);
        qb.push(") OR (endtime > ");
        qb.push_bind(from);
        qb.push(" AND endtime <= ");
        qb.push_bind(to);
        qb.push(")) ORDER BY uid");

        let rows = qb
            .build_query_as::<TemporalContentRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|row| row.into_content(table)).collect())
    }

    async fn rows_with_temporal_fields(
        &self,
        table: &ContentTable,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Vec<TemporalContent>, RepoError> {
        let mut qb = select_from(table);
        qb.push(" AND (starttime > 0 OR endtime > 0)");
        Self::push_scope_conditions(&mut qb, workspace_id, language_id);
        qb.push(" ORDER BY uid");

        let rows = qb
            .build_query_as::<TemporalContentRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|row| row.into_content(table)).collect())
    }
}
