//! Timing strategies: when invalidation happens.
//!
//! Dynamic timing shortens cache lifetimes so entries expire at the next
//! transition. Scheduler timing leaves lifetimes alone and flushes tags when
//! the batch runner observes a transition. Hybrid timing routes per table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::application::clock::Clock;
use crate::application::error::TemporalError;
use crate::application::harmonize::Harmonizer;
use crate::application::repos::CacheTagSink;
use crate::application::scoping::ScopingStrategy;
use crate::cache::CacheTag;
use crate::domain::{ContentTable, TransitionEvent};

const METRIC_TAGS_FLUSHED: &str = "tidemark_tags_flushed_total";

#[async_trait]
pub trait TimingStrategy: Send + Sync {
    /// Lifetime in seconds for a page rendered now, or `None` to leave the
    /// host's lifetime untouched.
    async fn cache_lifetime(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<u64>, TemporalError>;

    async fn process_transition(&self, event: &TransitionEvent) -> Result<(), TemporalError>;

    fn name(&self) -> &'static str;
}

/// Per-table routing target of the hybrid strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingKind {
    Dynamic,
    Scheduler,
}

impl TimingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TimingKind::Dynamic => "dynamic",
            TimingKind::Scheduler => "scheduler",
        }
    }
}

impl FromStr for TimingKind {
    type Err = TemporalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "dynamic" => Ok(TimingKind::Dynamic),
            "scheduler" => Ok(TimingKind::Scheduler),
            other => Err(TemporalError::configuration(format!(
                "unknown timing kind `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingStrategyKind {
    Dynamic,
    Scheduler,
    Hybrid,
}

impl TimingStrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TimingStrategyKind::Dynamic => "dynamic",
            TimingStrategyKind::Scheduler => "scheduler",
            TimingStrategyKind::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for TimingStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimingStrategyKind {
    type Err = TemporalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "dynamic" => Ok(TimingStrategyKind::Dynamic),
            "scheduler" => Ok(TimingStrategyKind::Scheduler),
            "hybrid" => Ok(TimingStrategyKind::Hybrid),
            other => Err(TemporalError::configuration(format!(
                "unknown timing strategy `{other}`"
            ))),
        }
    }
}

pub struct DynamicTiming {
    scoping: Arc<dyn ScopingStrategy>,
    clock: Arc<dyn Clock>,
    harmonizer: Option<Harmonizer>,
}

impl DynamicTiming {
    pub fn new(
        scoping: Arc<dyn ScopingStrategy>,
        clock: Arc<dyn Clock>,
        harmonizer: Option<Harmonizer>,
    ) -> Self {
        Self {
            scoping,
            clock,
            harmonizer,
        }
    }
}

#[async_trait]
impl TimingStrategy for DynamicTiming {
    async fn cache_lifetime(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<u64>, TemporalError> {
        let Some(next) = self
            .scoping
            .next_transition(workspace_id, language_id)
            .await?
        else {
            return Ok(None);
        };
        let now = self.clock.now();

        let target = self
            .harmonizer
            .as_ref()
            .map(|harmonizer| harmonizer.harmonize(next))
            // A slot may only pull the expiry earlier, never past the change.
            .filter(|harmonized| *harmonized > now && *harmonized <= next)
            .unwrap_or(next);

        Ok(Some(u64::try_from(target - now).unwrap_or(0)))
    }

    async fn process_transition(&self, _event: &TransitionEvent) -> Result<(), TemporalError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        TimingStrategyKind::Dynamic.as_str()
    }
}

pub struct SchedulerTiming {
    scoping: Arc<dyn ScopingStrategy>,
    sink: Arc<dyn CacheTagSink>,
}

impl SchedulerTiming {
    pub fn new(scoping: Arc<dyn ScopingStrategy>, sink: Arc<dyn CacheTagSink>) -> Self {
        Self { scoping, sink }
    }
}

#[async_trait]
impl TimingStrategy for SchedulerTiming {
    async fn cache_lifetime(
        &self,
        _workspace_id: i32,
        _language_id: i32,
    ) -> Result<Option<u64>, TemporalError> {
        Ok(None)
    }

    async fn process_transition(&self, event: &TransitionEvent) -> Result<(), TemporalError> {
        let content = event.content();
        let tags: BTreeSet<CacheTag> = self
            .scoping
            .cache_tags_to_flush(content, event.workspace_id(), event.language_id())
            .await;

        if tags.is_empty() {
            debug!(
                target = "application::timing::scheduler",
                table = %content.table(),
                uid = content.uid(),
                "no cache tags to flush"
            );
            return Ok(());
        }

        self.sink.flush(&tags).await.map_err(TemporalError::flush)?;
        counter!(METRIC_TAGS_FLUSHED).increment(tags.len() as u64);

        info!(
            target = "application::timing::scheduler",
            table = %content.table(),
            uid = content.uid(),
            transition_type = %event.transition_type(),
            timestamp = event.timestamp(),
            tags = ?tags.iter().map(CacheTag::as_str).collect::<Vec<_>>(),
            "flushed cache tags for transition"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        TimingStrategyKind::Scheduler.as_str()
    }
}

/// Table routing for [`HybridTiming`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridRouting {
    routes: BTreeMap<ContentTable, TimingKind>,
    default: TimingKind,
}

impl Default for HybridRouting {
    fn default() -> Self {
        Self {
            routes: BTreeMap::from([
                (ContentTable::pages(), TimingKind::Dynamic),
                (ContentTable::content_elements(), TimingKind::Scheduler),
            ]),
            default: TimingKind::Scheduler,
        }
    }
}

impl HybridRouting {
    pub fn new(routes: BTreeMap<ContentTable, TimingKind>, default: TimingKind) -> Self {
        Self { routes, default }
    }

    /// Build routing from raw configuration values.
    ///
    /// Entries with an invalid table or kind are skipped with a warning, and
    /// an invalid default resolves to scheduler timing.
    pub fn resolve(routes: &BTreeMap<String, String>, default: &str) -> Self {
        let default = default.parse::<TimingKind>().unwrap_or_else(|err| {
            warn!(
                target = "application::timing::hybrid",
                error = %err,
                fallback = TimingKind::Scheduler.as_str(),
                "invalid hybrid default; using fallback"
            );
            TimingKind::Scheduler
        });

        let mut resolved = BTreeMap::new();
        for (table, kind) in routes {
            let parsed = ContentTable::new(table.as_str())
                .map_err(TemporalError::from)
                .and_then(|table| kind.parse::<TimingKind>().map(|kind| (table, kind)));
            match parsed {
                Ok((table, kind)) => {
                    resolved.insert(table, kind);
                }
                Err(err) => warn!(
                    target = "application::timing::hybrid",
                    table = table.as_str(),
                    kind = kind.as_str(),
                    error = %err,
                    "ignoring invalid hybrid route"
                ),
            }
        }

        Self::new(resolved, default)
    }

    pub fn route(&self, table: &ContentTable) -> TimingKind {
        self.routes.get(table).copied().unwrap_or(self.default)
    }
}

pub struct HybridTiming {
    dynamic: Arc<DynamicTiming>,
    scheduler: Arc<SchedulerTiming>,
    routing: HybridRouting,
}

impl HybridTiming {
    pub fn new(
        dynamic: Arc<DynamicTiming>,
        scheduler: Arc<SchedulerTiming>,
        routing: HybridRouting,
    ) -> Self {
        Self {
            dynamic,
            scheduler,
            routing,
        }
    }

    fn strategy_for(&self, table: &ContentTable) -> &dyn TimingStrategy {
        match self.routing.route(table) {
            TimingKind::Dynamic => self.dynamic.as_ref(),
            TimingKind::Scheduler => self.scheduler.as_ref(),
        }
    }
}

#[async_trait]
impl TimingStrategy for HybridTiming {
    /// Rendering always happens in the context of a page.
    async fn cache_lifetime(
        &self,
        workspace_id: i32,
        language_id: i32,
    ) -> Result<Option<u64>, TemporalError> {
        self.strategy_for(&ContentTable::pages())
            .cache_lifetime(workspace_id, language_id)
            .await
    }

    async fn process_transition(&self, event: &TransitionEvent) -> Result<(), TemporalError> {
        self.strategy_for(event.content().table())
            .process_transition(event)
            .await
    }

    fn name(&self) -> &'static str {
        TimingStrategyKind::Hybrid.as_str()
    }
}

/// Collaborators shared by every timing strategy.
pub struct TimingDependencies {
    pub scoping: Arc<dyn ScopingStrategy>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn CacheTagSink>,
    pub harmonizer: Option<Harmonizer>,
    pub routing: HybridRouting,
}

pub struct TimingStrategyFactory;

impl TimingStrategyFactory {
    /// Wire the selected strategy. Unknown selections resolve to dynamic.
    pub fn build(selection: &str, deps: TimingDependencies) -> Arc<dyn TimingStrategy> {
        let kind = selection.parse::<TimingStrategyKind>().unwrap_or_else(|err| {
            warn!(
                target = "application::timing::factory",
                selection,
                fallback = TimingStrategyKind::Dynamic.as_str(),
                error = %err,
                "invalid timing strategy selection; using fallback"
            );
            TimingStrategyKind::Dynamic
        });

        let TimingDependencies {
            scoping,
            clock,
            sink,
            harmonizer,
            routing,
        } = deps;

        match kind {
            TimingStrategyKind::Dynamic => {
                Arc::new(DynamicTiming::new(scoping, clock, harmonizer))
            }
            TimingStrategyKind::Scheduler => Arc::new(SchedulerTiming::new(scoping, sink)),
            TimingStrategyKind::Hybrid => Arc::new(HybridTiming::new(
                Arc::new(DynamicTiming::new(Arc::clone(&scoping), clock, harmonizer)),
                Arc::new(SchedulerTiming::new(scoping, sink)),
                routing,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::FixedClock;
    use crate::application::harmonize::parse_slot;
    use crate::application::repos::RepoError;
    use crate::application::scoping::{GlobalScoping, PerPageScoping, TransitionSource};
    use crate::application::temporal::TemporalContentRepository;
    use crate::cache::TransitionCache;
    use crate::domain::content::fixtures::content;
    use crate::domain::{TemporalContent, TransitionType, UnixTimestamp};
    use crate::infra::memory::{InMemoryContentStore, RecordingTagSink};

    const NOW: UnixTimestamp = 1_700_000_000;

    struct Fixture {
        clock: Arc<FixedClock>,
        scoping: Arc<dyn ScopingStrategy>,
        sink: Arc<RecordingTagSink>,
    }

    fn fixture(rows: Vec<TemporalContent>) -> Fixture {
        let clock = Arc::new(FixedClock::new(NOW));
        let repository = TemporalContentRepository::new(
            Arc::new(InMemoryContentStore::with_rows(rows)),
            Arc::new(TransitionCache::default()),
            vec![ContentTable::pages(), ContentTable::content_elements()],
            false,
        );
        let source = TransitionSource::new(Arc::new(repository), clock.clone());
        Fixture {
            clock,
            scoping: Arc::new(GlobalScoping::new(source)),
            sink: Arc::new(RecordingTagSink::new()),
        }
    }

    fn event(table: ContentTable, uid: i64) -> TransitionEvent {
        TransitionEvent::new(
            content(uid, table, Some(NOW), None),
            NOW,
            TransitionType::Start,
        )
    }

    fn tag_names(tags: &BTreeSet<CacheTag>) -> Vec<&str> {
        tags.iter().map(CacheTag::as_str).collect()
    }

    struct NoTags;

    #[async_trait]
    impl ScopingStrategy for NoTags {
        async fn cache_tags_to_flush(
            &self,
            _content: &TemporalContent,
            _workspace_id: i32,
            _language_id: i32,
        ) -> BTreeSet<CacheTag> {
            BTreeSet::new()
        }

        async fn next_transition(
            &self,
            _workspace_id: i32,
            _language_id: i32,
        ) -> Result<Option<UnixTimestamp>, RepoError> {
            Err(RepoError::Timeout)
        }

        fn name(&self) -> &'static str {
            "none"
        }
    }

    #[tokio::test]
    async fn dynamic_lifetime_is_distance_to_next_transition() {
        let fx = fixture(vec![content(1, ContentTable::pages(), Some(NOW + 3600), None)]);
        let timing = DynamicTiming::new(fx.scoping, fx.clock, None);

        assert_eq!(timing.cache_lifetime(0, 0).await.expect("lifetime"), Some(3600));
    }

    #[tokio::test]
    async fn dynamic_lifetime_is_none_without_transition() {
        let fx = fixture(Vec::new());
        let timing = DynamicTiming::new(fx.scoping, fx.clock, None);

        assert_eq!(timing.cache_lifetime(0, 0).await.expect("lifetime"), None);
    }

    #[tokio::test]
    async fn dynamic_lifetime_propagates_repository_errors() {
        let fx = fixture(Vec::new());
        let timing = DynamicTiming::new(Arc::new(NoTags), fx.clock, None);

        assert!(matches!(
            timing.cache_lifetime(0, 0).await,
            Err(TemporalError::Repository(RepoError::Timeout))
        ));
    }

    #[tokio::test]
    async fn dynamic_lifetime_uses_harmonized_target_when_in_future() {
        // 2023-11-15T00:00:00Z
        let midnight = 1_700_006_400;
        let harmonizer = Harmonizer::new(
            vec![parse_slot("00:00").expect("slot")],
            3600,
            chrono_tz::Tz::UTC,
        );

        // Transition shortly after the slot: expire at the slot.
        let fx = fixture(vec![content(1, ContentTable::pages(), Some(midnight + 600), None)]);
        let timing = DynamicTiming::new(fx.scoping, fx.clock.clone(), Some(harmonizer.clone()));
        assert_eq!(
            timing.cache_lifetime(0, 0).await.expect("lifetime"),
            Some((midnight - NOW) as u64)
        );

        // Harmonized instant already passed: the raw transition stays.
        let late = fixture(vec![content(
            1,
            ContentTable::pages(),
            Some(midnight + 1200),
            None,
        )]);
        late.clock.set(midnight + 300);
        let timing = DynamicTiming::new(late.scoping, late.clock, Some(harmonizer.clone()));
        assert_eq!(timing.cache_lifetime(0, 0).await.expect("lifetime"), Some(900));

        // Slot after the transition: never outlive the change itself.
        let early = fixture(vec![content(
            1,
            ContentTable::pages(),
            Some(midnight - 1200),
            None,
        )]);
        early.clock.set(midnight - 1800);
        let timing = DynamicTiming::new(early.scoping, early.clock, Some(harmonizer));
        assert_eq!(timing.cache_lifetime(0, 0).await.expect("lifetime"), Some(600));
    }

    #[tokio::test]
    async fn dynamic_processing_is_a_no_op() {
        let fx = fixture(Vec::new());
        let timing = DynamicTiming::new(fx.scoping, fx.clock, None);

        timing
            .process_transition(&event(ContentTable::pages(), 1))
            .await
            .expect("no-op");
        assert!(fx.sink.flushes().is_empty());
    }

    #[tokio::test]
    async fn scheduler_flushes_scoped_tags_and_keeps_lifetime() {
        let fx = fixture(vec![content(1, ContentTable::pages(), Some(NOW + 3600), None)]);
        let timing = SchedulerTiming::new(fx.scoping, fx.sink.clone());

        assert_eq!(timing.cache_lifetime(0, 0).await.expect("lifetime"), None);

        timing
            .process_transition(&event(ContentTable::content_elements(), 4))
            .await
            .expect("flush");
        let flushes = fx.sink.flushes();
        assert_eq!(flushes.len(), 1);
        assert_eq!(tag_names(&flushes[0]), vec!["pages"]);
    }

    #[tokio::test]
    async fn scheduler_skips_empty_tag_sets() {
        let fx = fixture(Vec::new());
        let timing = SchedulerTiming::new(Arc::new(NoTags), fx.sink.clone());

        timing
            .process_transition(&event(ContentTable::pages(), 1))
            .await
            .expect("nothing to flush");
        assert!(fx.sink.flushes().is_empty());
    }

    #[tokio::test]
    async fn scheduler_reports_sink_failures() {
        let fx = fixture(Vec::new());
        fx.sink.set_failing(true);
        let timing = SchedulerTiming::new(fx.scoping, fx.sink.clone());

        assert!(matches!(
            timing
                .process_transition(&event(ContentTable::pages(), 1))
                .await,
            Err(TemporalError::Flush { .. })
        ));
    }

    fn hybrid(fx: &Fixture, routing: HybridRouting) -> HybridTiming {
        HybridTiming::new(
            Arc::new(DynamicTiming::new(fx.scoping.clone(), fx.clock.clone(), None)),
            Arc::new(SchedulerTiming::new(fx.scoping.clone(), fx.sink.clone())),
            routing,
        )
    }

    #[tokio::test]
    async fn hybrid_lifetime_also_covers_scheduler_routed_tables() {
        let fx = fixture(vec![content(
            1,
            ContentTable::content_elements(),
            Some(NOW + 120),
            None,
        )]);

        let timing = hybrid(&fx, HybridRouting::default());
        assert_eq!(timing.cache_lifetime(0, 0).await.expect("lifetime"), Some(120));

        // The same record is flushed as well when its transition is scanned.
        timing
            .process_transition(&event(ContentTable::content_elements(), 1))
            .await
            .expect("scheduler route");
        assert_eq!(fx.sink.flushes().len(), 1);

        let all_scheduler = hybrid(
            &fx,
            HybridRouting::new(BTreeMap::new(), TimingKind::Scheduler),
        );
        assert_eq!(all_scheduler.cache_lifetime(0, 0).await.expect("lifetime"), None);
    }

    #[tokio::test]
    async fn hybrid_never_flushes_dynamic_routed_tables() {
        let fx = fixture(Vec::new());
        let timing = hybrid(&fx, HybridRouting::default());

        timing
            .process_transition(&event(ContentTable::pages(), 1))
            .await
            .expect("dynamic route");
        assert!(fx.sink.flushes().is_empty());

        timing
            .process_transition(&event(ContentTable::content_elements(), 2))
            .await
            .expect("scheduler route");
        let news = ContentTable::new("news").expect("table");
        timing
            .process_transition(&event(news, 3))
            .await
            .expect("default route");
        assert_eq!(fx.sink.flushes().len(), 2);
    }

    #[test]
    fn routing_resolution_skips_invalid_entries() {
        let raw = BTreeMap::from([
            ("pages".to_string(), "scheduler".to_string()),
            ("news".to_string(), "sometimes".to_string()),
            ("bad table".to_string(), "dynamic".to_string()),
        ]);
        let routing = HybridRouting::resolve(&raw, "weekly");

        assert_eq!(routing.route(&ContentTable::pages()), TimingKind::Scheduler);
        assert_eq!(
            routing.route(&ContentTable::new("news").expect("table")),
            TimingKind::Scheduler
        );
        assert_eq!(routing, HybridRouting::new(
            BTreeMap::from([(ContentTable::pages(), TimingKind::Scheduler)]),
            TimingKind::Scheduler,
        ));
    }

    fn deps(fx: &Fixture) -> TimingDependencies {
        TimingDependencies {
            scoping: fx.scoping.clone(),
            clock: fx.clock.clone(),
            sink: fx.sink.clone(),
            harmonizer: None,
            routing: HybridRouting::default(),
        }
    }

    #[test]
    fn factory_resolves_selection_with_dynamic_fallback() {
        let fx = fixture(Vec::new());

        assert_eq!(TimingStrategyFactory::build("scheduler", deps(&fx)).name(), "scheduler");
        assert_eq!(TimingStrategyFactory::build("hybrid", deps(&fx)).name(), "hybrid");
        assert_eq!(TimingStrategyFactory::build("dynamic", deps(&fx)).name(), "dynamic");
        assert_eq!(TimingStrategyFactory::build("eventual", deps(&fx)).name(), "dynamic");
    }

    #[tokio::test]
    async fn per_page_scoping_flows_through_scheduler() {
        let fx = fixture(Vec::new());
        let clock: Arc<dyn Clock> = fx.clock.clone();
        let repository = TemporalContentRepository::new(
            Arc::new(InMemoryContentStore::new()),
            Arc::new(TransitionCache::default()),
            vec![ContentTable::pages()],
            false,
        );
        let scoping = Arc::new(PerPageScoping::new(TransitionSource::new(
            Arc::new(repository),
            clock,
        )));
        let timing = SchedulerTiming::new(scoping, fx.sink.clone());

        timing
            .process_transition(&event(ContentTable::content_elements(), 9))
            .await
            .expect("flush");
        assert_eq!(tag_names(&fx.sink.flushed_tags()), vec!["pageId_1"]);
    }
}
