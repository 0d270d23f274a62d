//! # fwa-sync — Concurrency Primitives
//!
//! The building blocks that let many concurrent callers share one
//! expensive computation:
//!
//! - [`KeyedLock`]: per-key exclusive lock with a memo slot. The first
//!   holder computes and stores a result; queued holders read it.
//! - [`ContentCache`]: cost-bounded LRU of immutable blobs.
//! - [`OutcomeCache`]: LRU of successful results plus a short-lived
//!   negative cache of failures.
//! - [`TaskSupervisor`]: launcher for background work that outlives the
//!   request that started it, with graceful shutdown.
//!
//! Each shared structure sits behind one coarse `parking_lot::Mutex` whose
//! critical sections only touch maps; nothing awaits while holding it.

mod lru;

pub mod content_cache;
pub mod keyed_lock;
pub mod outcome_cache;
pub mod supervisor;

pub use content_cache::{CacheStats, ContentCache, ContentCacheConfig, ContentKey};
pub use keyed_lock::{KeyedLock, KeyedLockGuard};
pub use outcome_cache::{Cached, OutcomeCache};
pub use supervisor::{ShutdownReport, SupervisorError, TaskSupervisor};
