//! Scoping strategies: which cache tags a transition invalidates.
//!
//! - **Global**: every page, always.
//! - **PerPage**: the page itself, or the parent page of a content element.
//! - **PerContent**: like PerPage, plus every page the reference index says
//!   embeds the element. Any index failure falls back to the parent page.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::application::clock::Clock;
use crate::application::error::TemporalError;
use crate::application::repos::{ReferenceIndex, RepoError, TemporalContentRepo};
use crate::cache::CacheTag;
use crate::domain::{TemporalContent, UnixTimestamp};

#[async_trait]
pub trait ScopingStrategy: Send + Sync {
    async fn cache_tags_to_flush(
        &self,
        content: &TemporalContent,
        workspace_id: i32,
        language_id: i32,
    ) -> BTreeSet<CacheTag>;

    /// Next transition for the whole scope, independent of strategy.
    async fn next_transition(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopingStrategyKind {
    Global,
    PerPage,
    PerContent,
}

impl ScopingStrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopingStrategyKind::Global => "global",
            ScopingStrategyKind::PerPage => "per-page",
            ScopingStrategyKind::PerContent => "per-content",
        }
    }
}

impl fmt::Display for ScopingStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopingStrategyKind {
    type Err = TemporalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "global" => Ok(ScopingStrategyKind::Global),
            "per-page" => Ok(ScopingStrategyKind::PerPage),
            "per-content" => Ok(ScopingStrategyKind::PerContent),
            other => Err(TemporalError::configuration(format!(
                "unknown scoping strategy `{other}`"
            ))),
        }
    }
}

/// Shared "what is now, what is next" plumbing for every strategy.
#[derive(Clone)]
pub struct TransitionSource {
    repository: Arc<dyn TemporalContentRepo>,
    clock: Arc<dyn Clock>,
}

impl TransitionSource {
    pub fn new(repository: Arc<dyn TemporalContentRepo>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    async fn next_transition(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        self.repository
            .next_transition(self.clock.now(), workspace_id, language_id)
            .await
    }
}

fn own_page_tag(content: &TemporalContent) -> CacheTag {
    if content.is_page() {
        CacheTag::page(content.uid())
    } else {
        CacheTag::page(content.pid())
    }
}

pub struct GlobalScoping {
    source: TransitionSource,
}

impl GlobalScoping {
    pub fn new(source: TransitionSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ScopingStrategy for GlobalScoping {
    async fn cache_tags_to_flush(
        &self,
        _content: &TemporalContent,
        _workspace_id: i32,
        _language_id: i32,
    ) -> BTreeSet<CacheTag> {
        BTreeSet::from([CacheTag::pages()])
    }

    async fn next_transition(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        self.source.next_transition(workspace_id, language_id).await
    }

    fn name(&self) -> &'static str {
        ScopingStrategyKind::Global.as_str()
    }
}

pub struct PerPageScoping {
    source: TransitionSource,
}

impl PerPageScoping {
    pub fn new(source: TransitionSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ScopingStrategy for PerPageScoping {
    async fn cache_tags_to_flush(
        &self,
        content: &TemporalContent,
        _workspace_id: i32,
        _language_id: i32,
    ) -> BTreeSet<CacheTag> {
        BTreeSet::from([own_page_tag(content)])
    }

    async fn next_transition(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        self.source.next_transition(workspace_id, language_id).await
    }

    fn name(&self) -> &'static str {
        ScopingStrategyKind::PerPage.as_str()
    }
}

pub struct PerContentScoping {
    source: TransitionSource,
    references: Arc<dyn ReferenceIndex>,
    use_reference_index: bool,
}

impl PerContentScoping {
    pub fn new(
        source: TransitionSource,
        references: Arc<dyn ReferenceIndex>,
        use_reference_index: bool,
    ) -> Self {
        Self {
            source,
            references,
            use_reference_index,
        }
    }

    async fn embedding_pages(
        &self,
        content: &TemporalContent,
        language_id: i32,
    ) -> Result<BTreeSet<i64>, TemporalError> {
        self.references
            .find_pages_embedding(content.uid(), language_id)
            .await
            .map_err(TemporalError::reference_index)
    }
}

#[async_trait]
impl ScopingStrategy for PerContentScoping {
    async fn cache_tags_to_flush(
        &self,
        content: &TemporalContent,
        _workspace_id: i32,
        language_id: i32,
    ) -> BTreeSet<CacheTag> {
        let parent = own_page_tag(content);
        if content.is_page() || !self.use_reference_index {
            return BTreeSet::from([parent]);
        }

        match self.embedding_pages(content, language_id).await {
            Ok(pages) if !pages.is_empty() => {
                let mut tags: BTreeSet<CacheTag> = pages.into_iter().map(CacheTag::page).collect();
                tags.insert(parent);
                tags
            }
            Ok(_) => {
                debug!(
                    target = "application::scoping::per_content",
                    table = %content.table(),
                    uid = content.uid(),
                    "no embedding pages indexed; flushing parent page"
                );
                BTreeSet::from([parent])
            }
            Err(err) => {
                warn!(
                    target = "application::scoping::per_content",
                    table = %content.table(),
                    uid = content.uid(),
                    error = %err,
                    "reference index lookup failed; flushing parent page"
                );
                BTreeSet::from([parent])
            }
        }
    }

    async fn next_transition(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        self.source.next_transition(workspace_id, language_id).await
    }

    fn name(&self) -> &'static str {
        ScopingStrategyKind::PerContent.as_str()
    }
}

/// Resolves the configured scoping strategy and stands in for it.
///
/// Unknown selections and unregistered kinds resolve to Global.
pub struct ScopingStrategyFactory {
    active: Arc<dyn ScopingStrategy>,
}

impl ScopingStrategyFactory {
    pub fn new(
        registry: HashMap<ScopingStrategyKind, Arc<dyn ScopingStrategy>>,
        global: Arc<dyn ScopingStrategy>,
        selection: &str,
    ) -> Self {
        let active = match selection.parse::<ScopingStrategyKind>() {
            Ok(kind) => match registry.get(&kind) {
                Some(strategy) => Arc::clone(strategy),
                None => {
                    warn!(
                        target = "application::scoping::factory",
                        selection = kind.as_str(),
                        fallback = "global",
                        "scoping strategy not registered; using fallback"
                    );
                    global
                }
            },
            Err(err) => {
                warn!(
                    target = "application::scoping::factory",
                    selection,
                    fallback = "global",
                    error = %err,
                    "invalid scoping strategy selection; using fallback"
                );
                global
            }
        };

        Self { active }
    }

    /// Registry of the three built-in strategies over a shared transition
    /// source.
    pub fn with_builtin(
        source: TransitionSource,
        references: Arc<dyn ReferenceIndex>,
        use_reference_index: bool,
        selection: &str,
    ) -> Self {
        let global: Arc<dyn ScopingStrategy> = Arc::new(GlobalScoping::new(source.clone()));
        let registry: HashMap<ScopingStrategyKind, Arc<dyn ScopingStrategy>> = HashMap::from([
            (ScopingStrategyKind::Global, Arc::clone(&global)),
            (
                ScopingStrategyKind::PerPage,
                Arc::new(PerPageScoping::new(source.clone())) as Arc<dyn ScopingStrategy>,
            ),
            (
                ScopingStrategyKind::PerContent,
                Arc::new(PerContentScoping::new(
                    source,
                    references,
                    use_reference_index,
                )) as Arc<dyn ScopingStrategy>,
            ),
        ]);
        Self::new(registry, global, selection)
    }

    pub fn active(&self) -> &Arc<dyn ScopingStrategy> {
        &self.active
    }
}

#[async_trait]
impl ScopingStrategy for ScopingStrategyFactory {
    async fn cache_tags_to_flush(
        &self,
        content: &TemporalContent,
        workspace_id: i32,
        language_id: i32,
    ) -> BTreeSet<CacheTag> {
        self.active
            .cache_tags_to_flush(content, workspace_id, language_id)
            .await
    }

    async fn next_transition(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<UnixTimestamp>, RepoError> {
        self.active.next_transition(workspace_id, language_id).await
    }

    fn name(&self) -> &'static str {
        self.active.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::FixedClock;
    use crate::application::temporal::TemporalContentRepository;
    use crate::cache::TransitionCache;
    use crate::domain::{ContentTable, TemporalContentParams};
    use crate::domain::content::fixtures::content;
    use crate::infra::memory::{InMemoryContentStore, InMemoryReferenceIndex};

    const NOW: UnixTimestamp = 1_700_000_000;

    fn source(store: Arc<InMemoryContentStore>) -> TransitionSource {
        let repository = TemporalContentRepository::new(
            store,
            Arc::new(TransitionCache::default()),
            vec![ContentTable::pages(), ContentTable::content_elements()],
            false,
        );
        TransitionSource::new(Arc::new(repository), Arc::new(FixedClock::new(NOW)))
    }

    fn empty_source() -> TransitionSource {
        source(Arc::new(InMemoryContentStore::new()))
    }

    fn element(uid: i64, pid: i64) -> TemporalContent {
        TemporalContent::new(TemporalContentParams {
            uid,
            table: ContentTable::content_elements(),
            title: format!("element {uid}"),
            pid,
            starttime: Some(NOW + 60),
            endtime: None,
            language_id: 0,
            workspace_id: 0,
            hidden: false,
            deleted: false,
        })
    }

    fn page(uid: i64) -> TemporalContent {
        content(uid, ContentTable::pages(), Some(NOW + 60), None)
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn names(set: BTreeSet<CacheTag>) -> Vec<String> {
        set.into_iter().map(|tag| tag.to_string()).collect()
    }

    #[tokio::test]
    async fn global_always_flushes_all_pages() {
        let strategy = GlobalScoping::new(empty_source());

        for record in [page(5), element(8, 5)] {
            assert_eq!(
                names(strategy.cache_tags_to_flush(&record, 0, 0).await),
                tags(&["pages"])
            );
        }
        assert_eq!(strategy.name(), "global");
    }

    #[tokio::test]
    async fn per_page_uses_own_uid_or_parent() {
        let strategy = PerPageScoping::new(empty_source());

        assert_eq!(
            names(strategy.cache_tags_to_flush(&page(5), 0, 0).await),
            tags(&["pageId_5"])
        );
        assert_eq!(
            names(strategy.cache_tags_to_flush(&element(8, 12), 0, 0).await),
            tags(&["pageId_12"])
        );
    }

    #[tokio::test]
    async fn per_content_adds_embedding_pages() {
        let index = Arc::new(InMemoryReferenceIndex::new());
        index.add_reference(8, 0, 30);
        index.add_reference(8, 0, 31);
        let strategy = PerContentScoping::new(empty_source(), index, true);

        assert_eq!(
            names(strategy.cache_tags_to_flush(&element(8, 12), 0, 0).await),
            tags(&["pageId_12", "pageId_30", "pageId_31"])
        );
    }

    #[tokio::test]
    async fn per_content_falls_back_to_parent_when_index_fails() {
        let index = Arc::new(InMemoryReferenceIndex::new());
        index.add_reference(8, 0, 30);
        index.set_failing(true);
        let strategy = PerContentScoping::new(empty_source(), index, true);

        assert_eq!(
            names(strategy.cache_tags_to_flush(&element(8, 12), 0, 0).await),
            tags(&["pageId_12"])
        );
    }

    #[tokio::test]
    async fn per_content_falls_back_to_parent_when_index_empty_or_disabled() {
        let index = Arc::new(InMemoryReferenceIndex::new());
        let strategy = PerContentScoping::new(empty_source(), index.clone(), true);
        assert_eq!(
            names(strategy.cache_tags_to_flush(&element(8, 12), 0, 0).await),
            tags(&["pageId_12"])
        );

        index.add_reference(8, 0, 30);
        let disabled = PerContentScoping::new(empty_source(), index.clone(), false);
        let lookups_before = index.lookup_count();
        assert_eq!(
            names(disabled.cache_tags_to_flush(&element(8, 12), 0, 0).await),
            tags(&["pageId_12"])
        );
        assert_eq!(index.lookup_count(), lookups_before);
    }

    #[tokio::test]
    async fn per_content_pages_skip_the_index() {
        let index = Arc::new(InMemoryReferenceIndex::new());
        let strategy = PerContentScoping::new(empty_source(), index.clone(), true);

        assert_eq!(
            names(strategy.cache_tags_to_flush(&page(5), 0, 0).await),
            tags(&["pageId_5"])
        );
        assert_eq!(index.lookup_count(), 0);
    }

    #[tokio::test]
    async fn next_transition_is_shared_across_strategies() {
        let store = Arc::new(InMemoryContentStore::with_rows([page(1)]));
        let source = source(store);
        let global = GlobalScoping::new(source.clone());
        let per_page = PerPageScoping::new(source);

        assert_eq!(global.next_transition(0, 0).await.expect("lookup"), Some(NOW + 60));
        assert_eq!(per_page.next_transition(0, 0).await.expect("lookup"), Some(NOW + 60));
    }

    #[tokio::test]
    async fn factory_selects_registered_strategy() {
        let index: Arc<dyn ReferenceIndex> = Arc::new(InMemoryReferenceIndex::new());
        let factory =
            ScopingStrategyFactory::with_builtin(empty_source(), index, true, "per-page");

        assert_eq!(factory.name(), "per-page");
        assert_eq!(
            names(factory.cache_tags_to_flush(&element(8, 12), 0, 0).await),
            tags(&["pageId_12"])
        );
    }

    #[tokio::test]
    async fn factory_falls_back_to_global() {
        let index: Arc<dyn ReferenceIndex> = Arc::new(InMemoryReferenceIndex::new());
        let unknown =
            ScopingStrategyFactory::with_builtin(empty_source(), index.clone(), true, "per-site");
        assert_eq!(unknown.name(), "global");

        let empty = ScopingStrategyFactory::with_builtin(empty_source(), index, true, "");
        assert_eq!(empty.name(), "global");

        let global: Arc<dyn ScopingStrategy> = Arc::new(GlobalScoping::new(empty_source()));
        let unregistered = ScopingStrategyFactory::new(HashMap::new(), global, "per-content");
        assert_eq!(unregistered.name(), "global");
        assert_eq!(
            names(unregistered.cache_tags_to_flush(&page(1), 0, 0).await),
            tags(&["pages"])
        );
    }
}
