//! Transition cache configuration.

use std::num::NonZeroU64;

const DEFAULT_BUCKET_SECONDS: u64 = 1;

/// Settings for the in-process transition memo.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Width of the time bucket that `now` is folded into before keying.
    pub bucket_seconds: NonZeroU64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bucket_seconds: NonZeroU64::new(DEFAULT_BUCKET_SECONDS).unwrap_or(NonZeroU64::MIN),
        }
    }
}

impl From<&crate::config::ContentSettings> for CacheConfig {
    fn from(settings: &crate::config::ContentSettings) -> Self {
        Self {
            bucket_seconds: settings.cache_bucket_seconds,
        }
    }
}

impl CacheConfig {
    /// Fold `now` into the start of its bucket.
    pub fn bucket_of(&self, now: i64) -> i64 {
        let width = i64::try_from(self.bucket_seconds.get()).unwrap_or(i64::MAX);
        now - now.rem_euclid(width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bucket_is_exact_second() {
        let config = CacheConfig::default();
        assert_eq!(config.bucket_seconds.get(), 1);
        assert_eq!(config.bucket_of(1_700_000_123), 1_700_000_123);
    }

    #[test]
    fn wider_buckets_floor_to_start() {
        let config = CacheConfig {
            bucket_seconds: NonZeroU64::new(60).expect("non-zero"),
        };
        assert_eq!(config.bucket_of(125), 120);
        assert_eq!(config.bucket_of(120), 120);
        assert_eq!(config.bucket_of(-1), -60);
    }
}
