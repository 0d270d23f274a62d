//! Caching policy for reads that can be served from, or fill, the content cache.

use serde::{Deserialize, Serialize};

/// Whether a read may consult and/or populate the content cache.
///
/// `Default` defers the choice to the callee, which resolves it with
/// [`CachingPolicy::resolve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachingPolicy {
    #[default]
    Default,
    Disable,
    Use,
    Store,
    UseAndStore,
}

impl CachingPolicy {
    /// Replace `Default` with the callee's fallback.
    pub fn resolve(self, fallback: CachingPolicy) -> CachingPolicy {
        match self {
            CachingPolicy::Default => fallback,
            other => other,
        }
    }

    /// Cached values may be returned.
    pub fn should_use(self) -> bool {
        matches!(self, CachingPolicy::Use | CachingPolicy::UseAndStore)
    }

    /// Freshly fetched values may be cached.
    pub fn should_store(self) -> bool {
        matches!(self, CachingPolicy::Store | CachingPolicy::UseAndStore)
    }
}
