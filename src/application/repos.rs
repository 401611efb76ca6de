//! Repository traits describing persistence adapters and host collaborators.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::CacheTag;
use crate::domain::{ContentTable, TemporalContent, TransitionEvent, UnixTimestamp};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn from_transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// The two bounds of a visibility window, named after their columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalField {
    Starttime,
    Endtime,
}

impl TemporalField {
    pub const ALL: [TemporalField; 2] = [TemporalField::Starttime, TemporalField::Endtime];

    pub fn column(self) -> &'static str {
        match self {
            TemporalField::Starttime => "starttime",
            TemporalField::Endtime => "endtime",
        }
    }
}

/// One targeted `MIN(field)` lookup over a single table.
#[derive(Debug, Clone)]
pub struct UpcomingQuery<'a> {
    pub table: &'a ContentTable,
    pub field: TemporalField,
    pub now: UnixTimestamp,
    pub workspace_id: i32,
    pub language_id: i32,
    pub include_hidden: bool,
}

/// Raw query surface over the tables holding temporal content.
///
/// Scope filtering is the same for every method that takes a workspace and
/// language: live records (`workspace_id = 0`) plus the requested workspace,
/// and the requested language plus the default language (`0`) and
/// "all languages" (`-1`). Deleted records are never returned. Temporal
/// values of `0` are never treated as transitions.
#[async_trait]
pub trait TemporalContentStore: Send + Sync {
    async fn min_upcoming(
        &self,
        query: &UpcomingQuery<'_>,
    ) -> Result<Option<UnixTimestamp>, RepoError>;

    /// Records whose `starttime` or `endtime` lies in `(from, to]`.
    async fn rows_transitioning_between(
        &self,
        table: &ContentTable,
        from: UnixTimestamp,
        to: UnixTimestamp,
        include_hidden: bool,
    ) -> Result<Vec<TemporalContent>, RepoError>;

    /// Records with any temporal bound set, hidden ones included.
    async fn rows_with_temporal_fields(
        &self,
        table: &ContentTable,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Vec<TemporalContent>, RepoError>;
}

#[async_trait]
pub trait TemporalContentRepo: Send + Sync {
    async fn next_transition(
        &self,
        now: UnixTimestamp,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError>;

    /// Transitions in `(from, to]`, ascending by timestamp.
    async fn find_transitions_in_range(
        &self,
        from: UnixTimestamp,
        to: UnixTimestamp,
    ) -> Result<Vec<TransitionEvent>, RepoError>;

    async fn find_all_with_temporal_fields(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Vec<TemporalContent>, RepoError>;
}

/// Lookup of pages that embed a content record somewhere other than its
/// parent page.
#[async_trait]
pub trait ReferenceIndex: Send + Sync {
    async fn find_pages_embedding(
        &self,
        content_uid: i64,
        language_id: i32,
    ) -> Result<BTreeSet<i64>, RepoError>;
}

/// Host cache backend entry point for tag invalidation.
#[async_trait]
pub trait CacheTagSink: Send + Sync {
    async fn flush(&self, tags: &BTreeSet<CacheTag>) -> Result<(), RepoError>;
}

/// Small key-value store holding integer watermarks. Last write wins.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<i64>, RepoError>;

    async fn set(&self, namespace: &str, key: &str, value: i64) -> Result<(), RepoError>;
}
