//! Render-time hook that caps a page's cache lifetime at its next transition.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::application::timing::TimingStrategy;

/// Ceiling used when neither the site nor the configuration provides one.
pub const FALLBACK_MAX_LIFETIME: u64 = 86_400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifetimeRequest {
    /// Lifetime the host would use on its own, if any.
    pub proposed: Option<u64>,
    /// Per-site maximum; `0` means unset.
    pub site_ceiling: u64,
    pub workspace_id: i32,
    pub language_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifetimeDecision {
    pub lifetime: Option<u64>,
    pub computed: Option<u64>,
    pub ceiling: u64,
}

pub struct CacheLifetimeHook {
    timing: Arc<dyn TimingStrategy>,
    default_max_lifetime: u64,
}

impl CacheLifetimeHook {
    pub fn new(timing: Arc<dyn TimingStrategy>, default_max_lifetime: u64) -> Self {
        Self {
            timing,
            default_max_lifetime,
        }
    }

    pub fn ceiling(&self, site_ceiling: u64) -> u64 {
        [site_ceiling, self.default_max_lifetime]
            .into_iter()
            .find(|ceiling| *ceiling > 0)
            .unwrap_or(FALLBACK_MAX_LIFETIME)
    }

    pub async fn modify_lifetime(&self, request: LifetimeRequest) -> Option<u64> {
        self.decide(request).await.lifetime
    }

    /// Same as [`Self::modify_lifetime`], keeping the intermediate values.
    pub async fn decide(&self, request: LifetimeRequest) -> LifetimeDecision {
        let ceiling = self.ceiling(request.site_ceiling);
        let computed = match self
            .timing
            .cache_lifetime(request.workspace_id, request.language_id)
            .await
        {
            Ok(computed) => computed,
            Err(err) => {
                warn!(
                    target = "application::lifetime",
                    strategy = self.timing.name(),
                    workspace_id = request.workspace_id,
                    language_id = request.language_id,
                    error = %err,
                    "cache lifetime computation failed; keeping proposed lifetime"
                );
                None
            }
        };

        let lifetime = match computed {
            None => request.proposed,
            Some(computed) => {
                let capped = computed.min(ceiling);
                Some(request.proposed.map_or(capped, |proposed| capped.min(proposed)))
            }
        };

        LifetimeDecision {
            lifetime,
            computed,
            ceiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::error::TemporalError;
    use crate::application::repos::RepoError;
    use crate::domain::TransitionEvent;

    struct Fixed(Result<Option<u64>, ()>);

    #[async_trait]
    impl TimingStrategy for Fixed {
        async fn cache_lifetime(
            &self,
            _workspace_id: i32,
            _language_id: i32,
        ) -> Result<Option<u64>, TemporalError> {
            self.0
                .map_err(|_| TemporalError::Repository(RepoError::Timeout))
        }

        async fn process_transition(&self, _event: &TransitionEvent) -> Result<(), TemporalError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn hook(result: Result<Option<u64>, ()>, default_max: u64) -> CacheLifetimeHook {
        CacheLifetimeHook::new(Arc::new(Fixed(result)), default_max)
    }

    fn request(proposed: Option<u64>, site_ceiling: u64) -> LifetimeRequest {
        LifetimeRequest {
            proposed,
            site_ceiling,
            ..LifetimeRequest::default()
        }
    }

    #[tokio::test]
    async fn computed_lifetime_caps_proposed() {
        let hook = hook(Ok(Some(3600)), 86_400);
        assert_eq!(hook.modify_lifetime(request(Some(86_400), 0)).await, Some(3600));
        assert_eq!(hook.modify_lifetime(request(None, 0)).await, Some(3600));
        assert_eq!(hook.modify_lifetime(request(Some(60), 0)).await, Some(60));
    }

    #[tokio::test]
    async fn no_transition_keeps_proposed() {
        let hook = hook(Ok(None), 86_400);
        assert_eq!(hook.modify_lifetime(request(Some(500), 0)).await, Some(500));
        assert_eq!(hook.modify_lifetime(request(None, 0)).await, None);
    }

    #[tokio::test]
    async fn failures_keep_proposed() {
        let hook = hook(Err(()), 86_400);
        assert_eq!(hook.modify_lifetime(request(Some(500), 0)).await, Some(500));
    }

    #[tokio::test]
    async fn result_never_exceeds_ceiling() {
        let far = hook(Ok(Some(10 * 86_400)), 0);
        assert_eq!(far.modify_lifetime(request(None, 0)).await, Some(FALLBACK_MAX_LIFETIME));
        assert_eq!(far.modify_lifetime(request(None, 7200)).await, Some(7200));

        let configured = hook(Ok(Some(10 * 86_400)), 43_200);
        let decision = configured.decide(request(None, 0)).await;
        assert_eq!(decision.ceiling, 43_200);
        assert_eq!(decision.lifetime, Some(43_200));
        assert_eq!(decision.computed, Some(10 * 86_400));
    }

    #[test]
    fn ceiling_precedence() {
        let hook = hook(Ok(None), 600);
        assert_eq!(hook.ceiling(30), 30);
        assert_eq!(hook.ceiling(0), 600);
        assert_eq!(CacheLifetimeHook::new(Arc::new(Fixed(Ok(None))), 0).ceiling(0), 86_400);
    }
}
