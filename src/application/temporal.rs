//! Cached repository over the temporal content tables.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, instrument};

use crate::application::repos::{
    RepoError, TemporalContentRepo, TemporalContentStore, TemporalField, UpcomingQuery,
};
use crate::cache::TransitionCache;
use crate::domain::{
    ContentTable, TemporalContent, TransitionEvent, TransitionType, UnixTimestamp,
};

/// Answers transition queries from the memo first, the store second.
///
/// A cold `next_transition` lookup issues one `MIN()` query per table per
/// temporal field, so two tables cost four queries.
pub struct TemporalContentRepository {
    store: Arc<dyn TemporalContentStore>,
    cache: Arc<TransitionCache>,
    tables: Vec<ContentTable>,
    include_hidden: bool,
}

impl TemporalContentRepository {
    pub fn new(
        store: Arc<dyn TemporalContentStore>,
        cache: Arc<TransitionCache>,
        tables: Vec<ContentTable>,
        include_hidden: bool,
    ) -> Self {
        Self {
            store,
            cache,
            tables,
            include_hidden,
        }
    }

    pub fn tables(&self) -> &[ContentTable] {
        &self.tables
    }

    pub fn cache(&self) -> &Arc<TransitionCache> {
        &self.cache
    }

    async fn query_next_transition(
        &self,
        now: UnixTimestamp,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        let queries: Vec<UpcomingQuery<'_>> = self
            .tables
            .iter()
            .flat_map(|table| {
                TemporalField::ALL.into_iter().map(move |field| UpcomingQuery {
                    table,
                    field,
                    now,
                    workspace_id,
                    language_id,
                    include_hidden: self.include_hidden,
                })
            })
            .collect();

        let minima = try_join_all(queries.iter().map(|query| self.store.min_upcoming(query))).await?;

        Ok(minima.into_iter().flatten().filter(|ts| *ts > now).min())
    }
}

#[async_trait]
impl TemporalContentRepo for TemporalContentRepository {
    #[instrument(skip(self), level = "debug")]
    async fn next_transition(
        &self,
        now: UnixTimestamp,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        match self.cache.get(now, workspace_id, language_id) {
            // Wide buckets can hold an answer computed earlier in the bucket
            // that has since passed.
            Some(Some(ts)) if ts <= now => {}
            Some(cached) => return Ok(cached),
            None => {}
        }

        let next = self
            .query_next_transition(now, workspace_id, language_id)
            .await?;
        self.cache.set(now, workspace_id, language_id, next);

        debug!(
            target = "application::temporal::next_transition",
            now,
            workspace_id,
            language_id,
            next_transition = ?next,
            "computed next transition"
        );

        Ok(next)
    }

    async fn find_transitions_in_range(
        &self,
        from: UnixTimestamp,
        to: UnixTimestamp,
    ) -> Result<Vec<TransitionEvent>, RepoError> {
        if to <= from {
            return Ok(Vec::new());
        }

        let per_table = try_join_all(self.tables.iter().map(|table| {
            self.store
                .rows_transitioning_between(table, from, to, self.include_hidden)
        }))
        .await?;

        let mut events: Vec<TransitionEvent> = per_table
            .into_iter()
            .flatten()
            .flat_map(|row| events_in_range(row, from, to))
            .collect();

        events.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.content().table().cmp(b.content().table()))
                .then_with(|| a.content().uid().cmp(&b.content().uid()))
                .then_with(|| a.transition_type().cmp(&b.transition_type()))
        });

        Ok(events)
    }

    async fn find_all_with_temporal_fields(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Vec<TemporalContent>, RepoError> {
        let per_table = try_join_all(self.tables.iter().map(|table| {
            self.store
                .rows_with_temporal_fields(table, workspace_id, language_id)
        }))
        .await?;

        Ok(per_table.into_iter().flatten().collect())
    }
}

/// One event per bound of `row` that lies in `(from, to]`.
fn events_in_range(
    row: TemporalContent,
    from: UnixTimestamp,
    to: UnixTimestamp,
) -> Vec<TransitionEvent> {
    let in_range = |ts: Option<UnixTimestamp>| ts.filter(|ts| *ts > from && *ts <= to);

    match (in_range(row.starttime()), in_range(row.endtime())) {
        (Some(start), Some(end)) => vec![
            TransitionEvent::new(row.clone(), start, TransitionType::Start),
            TransitionEvent::new(row, end, TransitionType::End),
        ],
        (Some(start), None) => vec![TransitionEvent::new(row, start, TransitionType::Start)],
        (None, Some(end)) => vec![TransitionEvent::new(row, end, TransitionType::End)],
        (None, None) => Vec::new(),
    }
}
