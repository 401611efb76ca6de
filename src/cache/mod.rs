//! Tidemark cache primitives.
//!
//! - **Transition memo**: per-process answers to "when does the next piece of
//!   scheduled content start or stop being visible" for a workspace/language.
//! - **Cache tags**: the invalidation keys handed to the host cache backend.
//!
//! ## Configuration
//!
//! ```toml
//! [content]
//! cache_bucket_seconds = 1
//! ```

mod config;
pub(crate) mod lock;
mod tags;
mod transition;

pub use config::CacheConfig;
pub use tags::CacheTag;
pub use transition::{TransitionCache, TransitionCacheStats, TransitionKey};
