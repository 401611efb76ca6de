use std::sync::Arc;

use crate::{
    application::{
        clock::Clock,
        harmonize::Harmonizer,
        lifetime::CacheLifetimeHook,
        repos::{
            CacheTagSink, ReferenceIndex, TemporalContentRepo, TemporalContentStore,
            WatermarkStore,
        },
        scoping::{ScopingStrategy, ScopingStrategyFactory, TransitionSource},
        temporal::TemporalContentRepository,
        timing::{HybridRouting, TimingDependencies, TimingStrategy, TimingStrategyFactory},
    },
    cache::{CacheConfig, TransitionCache},
    config::Settings,
};

/// Host-provided adapters the engine is wired over.
#[derive(Clone)]
pub struct TemporalAdapters {
    pub store: Arc<dyn TemporalContentStore>,
    pub references: Arc<dyn ReferenceIndex>,
    pub sink: Arc<dyn CacheTagSink>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub clock: Arc<dyn Clock>,
}

/// Shared context handed to commands and job workers.
#[derive(Clone)]
pub struct TemporalContext {
    pub settings: Arc<Settings>,
    pub cache: Arc<TransitionCache>,
    pub repository: Arc<dyn TemporalContentRepo>,
    pub scoping: Arc<dyn ScopingStrategy>,
    pub timing: Arc<dyn TimingStrategy>,
    pub lifetime: Arc<CacheLifetimeHook>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub clock: Arc<dyn Clock>,
    pub harmonizer: Option<Harmonizer>,
}

impl TemporalContext {
    pub fn build(settings: Settings, adapters: TemporalAdapters) -> Self {
        let TemporalAdapters {
            store,
            references,
            sink,
            watermarks,
            clock,
        } = adapters;

        let cache = Arc::new(TransitionCache::new(CacheConfig::from(&settings.content)));
        let repository: Arc<dyn TemporalContentRepo> = Arc::new(TemporalContentRepository::new(
            store,
            Arc::clone(&cache),
            settings.content.tables.clone(),
            settings.content.include_hidden,
        ));

        let source = TransitionSource::new(Arc::clone(&repository), Arc::clone(&clock));
        let scoping: Arc<dyn ScopingStrategy> = Arc::new(ScopingStrategyFactory::with_builtin(
            source,
            references,
            settings.strategy.use_reference_index,
            &settings.strategy.scoping,
        ));

        let harmonizer = Harmonizer::from_settings(&settings.harmonization);
        let routing = HybridRouting::resolve(
            &settings.strategy.hybrid_routes,
            &settings.strategy.hybrid_default,
        );
        let timing = TimingStrategyFactory::build(
            &settings.strategy.timing,
            TimingDependencies {
                scoping: Arc::clone(&scoping),
                clock: Arc::clone(&clock),
                sink,
                harmonizer: harmonizer.clone(),
                routing,
            },
        );

        let lifetime = Arc::new(CacheLifetimeHook::new(
            Arc::clone(&timing),
            settings.lifetime.default_max_lifetime,
        ));

        Self {
            settings: Arc::new(settings),
            cache,
            repository,
            scoping,
            timing,
            lifetime,
            watermarks,
            clock,
            harmonizer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::FixedClock;
    use crate::infra::memory::{
        InMemoryContentStore, InMemoryReferenceIndex, InMemoryWatermarkStore, RecordingTagSink,
    };

    fn adapters() -> TemporalAdapters {
        TemporalAdapters {
            store: Arc::new(InMemoryContentStore::new()),
            references: Arc::new(InMemoryReferenceIndex::new()),
            sink: Arc::new(RecordingTagSink::new()),
            watermarks: Arc::new(InMemoryWatermarkStore::new()),
            clock: Arc::new(FixedClock::new(0)),
        }
    }

    #[test]
    fn wiring_follows_strategy_settings() {
        let mut settings = Settings::default();
        settings.strategy.scoping = "per-content".to_string();
        settings.strategy.timing = "hybrid".to_string();

        let context = TemporalContext::build(settings, adapters());
        assert_eq!(context.scoping.name(), "per-content");
        assert_eq!(context.timing.name(), "hybrid");
        assert!(context.harmonizer.is_none());
    }

    #[test]
    fn unknown_selections_use_fallbacks() {
        let mut settings = Settings::default();
        settings.strategy.scoping = "sitewide".to_string();
        settings.strategy.timing = "lazy".to_string();

        let context = TemporalContext::build(settings, adapters());
        assert_eq!(context.scoping.name(), "global");
        assert_eq!(context.timing.name(), "dynamic");
    }
}
