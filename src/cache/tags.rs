//! Cache tag definitions.
//!
//! Tags are opaque to this crate; the host cache backend decides what a
//! flushed tag removes.

use std::fmt;

use serde::Serialize;

const ALL_PAGES_TAG: &str = "pages";
const PAGE_TAG_PREFIX: &str = "pageId_";

/// Invalidation key understood by the host cache backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheTag(String);

impl CacheTag {
    /// Every cached page.
    pub fn pages() -> Self {
        Self(ALL_PAGES_TAG.to_string())
    }

    /// A single cached page.
    pub fn page(page_id: i64) -> Self {
        Self(format!("{PAGE_TAG_PREFIX}{page_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
