//! In-memory adapters with the same filtering rules as the Postgres ones.
//!
//! Used by tests and by local dry runs where no database is available.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::application::repos::{
    CacheTagSink, ReferenceIndex, RepoError, TemporalContentStore, TemporalField, UpcomingQuery,
    WatermarkStore,
};
use crate::cache::CacheTag;
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::{ContentTable, TemporalContent, UnixTimestamp};

const SOURCE: &str = "infra::memory";

/// Live records plus the requested workspace; requested language plus the
/// default and "all languages" records.
fn in_scope(content: &TemporalContent, workspace_id: i32, language_id: i32) -> bool {
    let workspace_matches = content.workspace_id() == 0 || content.workspace_id() == workspace_id;
    let language_matches = matches!(content.language_id(), 0 | -1)
        || content.language_id() == language_id;
    workspace_matches && language_matches
}

fn field_value(content: &TemporalContent, field: TemporalField) -> Option<UnixTimestamp> {
    match field {
        TemporalField::Starttime => content.starttime(),
        TemporalField::Endtime => content.endtime(),
    }
}

#[derive(Default)]
pub struct InMemoryContentStore {
    rows: RwLock<Vec<TemporalContent>>,
    queries: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = TemporalContent>) -> Self {
        let store = Self::new();
        for row in rows {
            store.insert(row);
        }
        store
    }

    pub fn insert(&self, content: TemporalContent) {
        rw_write(&self.rows, SOURCE, "insert").push(content);
    }

    /// Number of store queries issued so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Make every subsequent query fail with a persistence error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn begin_query(&self) -> Result<(), RepoError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("in-memory store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TemporalContentStore for InMemoryContentStore {
    async fn min_upcoming(
        &self,
        query: &UpcomingQuery<'_>,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        self.begin_query()?;
        let rows = rw_read(&self.rows, SOURCE, "min_upcoming");
        Ok(rows
            .iter()
            .filter(|row| row.table() == query.table)
            .filter(|row| !row.deleted())
            .filter(|row| query.include_hidden || !row.hidden())
            .filter(|row| in_scope(row, query.workspace_id, query.language_id))
            .filter_map(|row| field_value(row, query.field))
            .filter(|ts| *ts > query.now)
            .min())
    }

    async fn rows_transitioning_between(
        &self,
        table: &ContentTable,
        from: UnixTimestamp,
        to: UnixTimestamp,
        include_hidden: bool,
    ) -> Result<Vec<TemporalContent>, RepoError> {
        self.begin_query()?;
        let rows = rw_read(&self.rows, SOURCE, "rows_transitioning_between");
        Ok(rows
            .iter()
            .filter(|row| row.table() == table)
            .filter(|row| !row.deleted())
            .filter(|row| include_hidden || !row.hidden())
            .filter(|row| {
                TemporalField::ALL.iter().any(|field| {
                    field_value(row, *field).is_some_and(|ts| ts > from && ts <= to)
                })
            })
            .cloned()
            .collect())
    }

    async fn rows_with_temporal_fields(
        &self,
        table: &ContentTable,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Vec<TemporalContent>, RepoError> {
        self.begin_query()?;
        let rows = rw_read(&self.rows, SOURCE, "rows_with_temporal_fields");
        let mut matching: Vec<TemporalContent> = rows
            .iter()
            .filter(|row| row.table() == table)
            .filter(|row| !row.deleted())
            .filter(|row| row.has_temporal_fields())
            .filter(|row| in_scope(row, workspace_id, language_id))
            .cloned()
            .collect();
        matching.sort_by_key(TemporalContent::uid);
        Ok(matching)
    }
}

/// Reference index backed by a map of `(content uid, language)` to pages.
#[derive(Default)]
pub struct InMemoryReferenceIndex {
    references: RwLock<HashMap<(i64, i32), BTreeSet<i64>>>,
    failing: AtomicBool,
    lookups: AtomicUsize,
}

impl InMemoryReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reference(&self, content_uid: i64, language_id: i32, page_id: i64) {
        rw_write(&self.references, SOURCE, "add_reference")
            .entry((content_uid, language_id))
            .or_default()
            .insert(page_id);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceIndex for InMemoryReferenceIndex {
    async fn find_pages_embedding(
        &self,
        content_uid: i64,
        language_id: i32,
    ) -> Result<BTreeSet<i64>, RepoError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("reference index unavailable"));
        }
        let references = rw_read(&self.references, SOURCE, "find_pages_embedding");
        let mut pages = BTreeSet::new();
        for language in [language_id, -1] {
            if let Some(found) = references.get(&(content_uid, language)) {
                pages.extend(found.iter().copied());
            }
        }
        Ok(pages)
    }
}

/// Sink that remembers every flush it receives.
#[derive(Default)]
pub struct RecordingTagSink {
    flushes: RwLock<Vec<BTreeSet<CacheTag>>>,
    failing: AtomicBool,
}

impl RecordingTagSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flushes(&self) -> Vec<BTreeSet<CacheTag>> {
        rw_read(&self.flushes, SOURCE, "flushes").clone()
    }

    pub fn flushed_tags(&self) -> BTreeSet<CacheTag> {
        rw_read(&self.flushes, SOURCE, "flushed_tags")
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheTagSink for RecordingTagSink {
    async fn flush(&self, tags: &BTreeSet<CacheTag>) -> Result<(), RepoError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::from_transport("cache backend rejected flush"));
        }
        rw_write(&self.flushes, SOURCE, "flush").push(tags.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWatermarkStore {
    values: RwLock<BTreeMap<(String, String), i64>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<i64>, RepoError> {
        Ok(rw_read(&self.values, SOURCE, "watermark_get")
            .get(&(namespace.to_string(), key.to_string()))
            .copied())
    }

    async fn set(&self, namespace: &str, key: &str, value: i64) -> Result<(), RepoError> {
        rw_write(&self.values, SOURCE, "watermark_set")
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}
