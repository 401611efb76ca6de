//! Snapshot of one content record's temporal and identity fields.
//!
//! Records become visible at `starttime` and stop being visible at `endtime`.
//! Both bounds are optional, and a stored value of `0` means "unset" rather
//! than the epoch.

use std::fmt;

use serde::Serialize;

use super::error::DomainError;
use super::transition::TransitionType;

/// Seconds since the Unix epoch.
pub type UnixTimestamp = i64;

const PAGES_TABLE: &str = "pages";
const CONTENT_ELEMENTS_TABLE: &str = "content_elements";
const MAX_IDENTIFIER_LEN: usize = 63;

/// Name of a table holding temporal content.
///
/// Table names are interpolated into SQL, so only plain identifiers are
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentTable(String);

impl ContentTable {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self(name))
    }

    /// The page table. Rows in it are pages in their own right.
    pub fn pages() -> Self {
        Self(PAGES_TABLE.to_string())
    }

    pub fn content_elements() -> Self {
        Self(CONTENT_ELEMENTS_TABLE.to_string())
    }

    pub fn is_pages(&self) -> bool {
        self.0 == PAGES_TABLE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_identifier(name: &str) -> Result<(), DomainError> {
    if name.is_empty() {
        return Err(DomainError::validation("table name must not be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(DomainError::validation(format!(
            "table name `{name}` exceeds {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(DomainError::validation(format!(
            "table name `{name}` must not start with a digit"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DomainError::validation(format!(
            "table name `{name}` may only contain ASCII letters, digits and underscores"
        )));
    }
    Ok(())
}

/// Raw field values used to construct a [`TemporalContent`].
#[derive(Debug, Clone)]
pub struct TemporalContentParams {
    pub uid: i64,
    pub table: ContentTable,
    pub title: String,
    pub pid: i64,
    pub starttime: Option<UnixTimestamp>,
    pub endtime: Option<UnixTimestamp>,
    pub language_id: i32,
    pub workspace_id: i32,
    pub hidden: bool,
    pub deleted: bool,
}

/// Immutable snapshot of one content record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemporalContent {
    uid: i64,
    table: ContentTable,
    title: String,
    pid: i64,
    starttime: Option<UnixTimestamp>,
    endtime: Option<UnixTimestamp>,
    language_id: i32,
    workspace_id: i32,
    hidden: bool,
    deleted: bool,
}

impl TemporalContent {
    /// Build a snapshot, folding zero or negative bounds into "unset".
    pub fn new(params: TemporalContentParams) -> Self {
        Self {
            uid: params.uid,
            table: params.table,
            title: params.title,
            pid: params.pid,
            starttime: non_zero(params.starttime),
            endtime: non_zero(params.endtime),
            language_id: params.language_id,
            workspace_id: params.workspace_id,
            hidden: params.hidden,
            deleted: params.deleted,
        }
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn table(&self) -> &ContentTable {
        &self.table
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn pid(&self) -> i64 {
        self.pid
    }

    pub fn starttime(&self) -> Option<UnixTimestamp> {
        self.starttime
    }

    pub fn endtime(&self) -> Option<UnixTimestamp> {
        self.endtime
    }

    pub fn language_id(&self) -> i32 {
        self.language_id
    }

    pub fn workspace_id(&self) -> i32 {
        self.workspace_id
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_page(&self) -> bool {
        self.table.is_pages()
    }

    pub fn has_temporal_fields(&self) -> bool {
        self.starttime.is_some() || self.endtime.is_some()
    }

    /// Whether the record is visible at `now`.
    ///
    /// The window is `[starttime, endtime)` in spirit, but a record whose
    /// `endtime` equals `now` still counts as visible for that second.
    pub fn is_visible(&self, now: UnixTimestamp) -> bool {
        if self.hidden || self.deleted {
            return false;
        }
        if self.starttime.is_some_and(|start| start > now) {
            return false;
        }
        if self.endtime.is_some_and(|end| end < now) {
            return false;
        }
        true
    }

    /// The earliest bound strictly after `now`.
    pub fn next_transition(&self, now: UnixTimestamp) -> Option<UnixTimestamp> {
        [self.starttime, self.endtime]
            .into_iter()
            .flatten()
            .filter(|ts| *ts > now)
            .min()
    }

    /// Classify an exact timestamp as this record's start or end.
    ///
    /// When both bounds are equal the start wins.
    pub fn transition_type_at(&self, timestamp: UnixTimestamp) -> Option<TransitionType> {
        if self.starttime == Some(timestamp) {
            Some(TransitionType::Start)
        } else if self.endtime == Some(timestamp) {
            Some(TransitionType::End)
        } else {
            None
        }
    }
}

fn non_zero(value: Option<UnixTimestamp>) -> Option<UnixTimestamp> {
    value.filter(|ts| *ts > 0)
}
